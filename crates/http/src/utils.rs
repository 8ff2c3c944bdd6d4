/// Returns early with `$error` unless `$predicate` holds.
///
/// ```ignore
/// ensure!(header_count <= MAX_HEADER_NUM, ParseError::too_many_headers(header_count));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
