//! Request body decoding.
//!
//! The body is read in full (up to `max_body_bytes`) and decoded by the
//! request's media type:
//!
//! | media type                          | decoded with                        |
//! |-------------------------------------|-------------------------------------|
//! | `application/x-www-form-urlencoded` | [`FormDataParser`], if declared     |
//! | `multipart/form-data`               | [`MultipartParser`], if declared    |
//! | `application/json`                  | `serde`, always                     |
//! | `text/plain`                        | [`PlainTextParser`], if declared    |
//!
//! Anything else is `415 Unsupported Media Type`.

use bytes::{Bytes, BytesMut};
use futures::stream;
use http::HeaderValue;
use http::header::CONTENT_TYPE;
use http_body_util::BodyExt;
use multer::{Constraints, Multipart, SizeLimit};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};

use crate::config::ServerConfig;
use crate::dispatch::RequestBody;
use crate::error::Error;
use crate::request::RequestContext;

pub trait FormDataParser {
    fn parse_form_data(&mut self, values: FormValues) -> Result<(), Error>;
}

pub trait MultipartParser {
    fn parse_multipart(&mut self, form: MultipartForm) -> Result<(), Error>;
}

pub trait PlainTextParser {
    fn parse_plain_text(&mut self, text: Bytes) -> Result<(), Error>;
}

/// A request body type.
///
/// JSON is always decoded through `Deserialize`; the other media types only
/// reach the value through the parsers it lists in [`DecodeBody::declare`].
pub trait DecodeBody: Default + DeserializeOwned + Send + 'static {
    fn declare(parsers: &mut BodyParsers<Self>) {
        let _ = parsers;
    }

    fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

type ParseFn<B, V> = fn(&mut B, V) -> Result<(), Error>;

/// The parser contracts a body type satisfies.
pub struct BodyParsers<B> {
    form_data: Option<ParseFn<B, FormValues>>,
    multipart: Option<ParseFn<B, MultipartForm>>,
    plain_text: Option<ParseFn<B, Bytes>>,
}

impl<B: DecodeBody> BodyParsers<B> {
    pub(crate) fn compute() -> Self {
        let mut parsers = Self { form_data: None, multipart: None, plain_text: None };
        B::declare(&mut parsers);
        parsers
    }
}

impl<B> BodyParsers<B> {
    pub fn form_data(&mut self) -> &mut Self
    where
        B: FormDataParser,
    {
        self.form_data = Some(<B as FormDataParser>::parse_form_data);
        self
    }

    pub fn multipart(&mut self) -> &mut Self
    where
        B: MultipartParser,
    {
        self.multipart = Some(<B as MultipartParser>::parse_multipart);
        self
    }

    pub fn plain_text(&mut self) -> &mut Self
    where
        B: PlainTextParser,
    {
        self.plain_text = Some(<B as PlainTextParser>::parse_plain_text);
        self
    }
}

impl<B> std::fmt::Debug for BodyParsers<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyParsers")
            .field("form_data", &self.form_data.is_some())
            .field("multipart", &self.multipart.is_some())
            .field("plain_text", &self.plain_text.is_some())
            .finish()
    }
}

/// Decoded form fields, in body order. Repeated keys keep every value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct FormValues(Vec<(String, String)>);

impl FormValues {
    /// The first value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a, 'k>(&'a self, key: &'k str) -> impl Iterator<Item = &'a str> + use<'a, 'k> {
        self.0.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn extend(&mut self, other: FormValues) {
        self.0.extend(other.0);
    }
}

impl FromIterator<(String, String)> for FormValues {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    pub values: FormValues,
    pub files: Vec<FilePart>,
}

/// A body type accepting url-encoded forms, multipart uploads and JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FormBody {
    #[serde(default)]
    pub values: FormValues,
    #[serde(skip)]
    pub files: Vec<FilePart>,
}

impl FormDataParser for FormBody {
    fn parse_form_data(&mut self, values: FormValues) -> Result<(), Error> {
        self.values.extend(values);
        Ok(())
    }
}

impl MultipartParser for FormBody {
    fn parse_multipart(&mut self, form: MultipartForm) -> Result<(), Error> {
        self.values.extend(form.values);
        self.files.extend(form.files);
        Ok(())
    }
}

impl DecodeBody for FormBody {
    fn declare(parsers: &mut BodyParsers<Self>) {
        parsers.form_data().multipart();
    }
}

impl PlainTextParser for String {
    fn parse_plain_text(&mut self, text: Bytes) -> Result<(), Error> {
        *self = String::from_utf8(text.to_vec()).map_err(Error::bad_request)?;
        Ok(())
    }
}

impl DecodeBody for String {
    fn declare(parsers: &mut BodyParsers<Self>) {
        parsers.plain_text();
    }
}

impl DecodeBody for serde_json::Value {}

/// No body expected; JSON is only checked for well-formedness.
impl DecodeBody for () {
    fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<IgnoredAny>(bytes).map(|_| ())
    }
}

/// Reads and decodes the request body. `None` when the body is empty.
pub(crate) async fn read_body<S, B>(
    ctx: &mut RequestContext<S>,
    body: RequestBody,
    parsers: &BodyParsers<B>,
    config: &ServerConfig,
) -> Result<Option<B>, Error>
where
    B: DecodeBody,
{
    let bytes = collect_body(body, config.max_body_bytes).await?;
    ctx.record_request_bytes(bytes.len() as u64);

    if bytes.is_empty() {
        return Ok(None);
    }

    decode_body(ctx.headers().get(CONTENT_TYPE), bytes, parsers, config.multipart_max_bytes).await.map(Some)
}

/// Collects data frames until the body ends or grows past `limit`.
async fn collect_body(mut body: RequestBody, limit: usize) -> Result<Bytes, Error> {
    let mut collected = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(Error::bad_request)?;
        let Ok(data) = frame.into_data() else {
            continue;
        };
        if collected.len() + data.len() > limit {
            return Err(Error::payload_too_large(format!("request body is larger than {limit} bytes")));
        }
        collected.extend_from_slice(&data);
    }
    Ok(collected.freeze())
}

/// Decodes a complete, non-empty body by its `Content-Type`.
pub async fn decode_body<B: DecodeBody>(
    content_type: Option<&HeaderValue>,
    bytes: Bytes,
    parsers: &BodyParsers<B>,
    multipart_limit: u64,
) -> Result<B, Error> {
    let content_type = content_type.ok_or_else(|| Error::bad_request("request body without content type"))?;
    let media_type: mime::Mime =
        content_type.to_str().map_err(Error::bad_request)?.parse().map_err(Error::bad_request)?;

    let mut target = B::default();
    let essence = media_type.essence_str().to_ascii_lowercase();
    match essence.as_str() {
        "application/x-www-form-urlencoded" => {
            if let Some(parse) = parsers.form_data {
                let values: Vec<(String, String)> = serde_urlencoded::from_bytes(&bytes).map_err(Error::bad_request)?;
                parse(&mut target, FormValues(values))?;
            }
        }
        "multipart/form-data" => {
            if let Some(parse) = parsers.multipart {
                let boundary = media_type
                    .get_param(mime::BOUNDARY)
                    .ok_or_else(|| Error::bad_request("multipart body without boundary"))?;
                let form = read_multipart(bytes, boundary.as_str(), multipart_limit).await?;
                parse(&mut target, form)?;
            }
        }
        "application/json" => {
            target = B::from_json(&bytes).map_err(Error::bad_request)?;
        }
        "text/plain" => {
            if let Some(parse) = parsers.plain_text {
                parse(&mut target, bytes)?;
            }
        }
        _ => return Err(Error::unsupported_media_type(essence)),
    }
    Ok(target)
}

async fn read_multipart(bytes: Bytes, boundary: &str, limit: u64) -> Result<MultipartForm, Error> {
    let constraints = Constraints::new().size_limit(SizeLimit::new().whole_stream(limit));
    let source = stream::once(async move { Ok::<Bytes, std::io::Error>(bytes) });
    let mut multipart = Multipart::with_constraints(source, boundary, constraints);

    let mut form = MultipartForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_owned();
        let file_name = field.file_name().map(ToOwned::to_owned);
        let content_type = field.content_type().map(ToString::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;

        if file_name.is_some() {
            form.files.push(FilePart { field: name, file_name, content_type, data });
        } else {
            let value = String::from_utf8(data.to_vec()).map_err(Error::bad_request)?;
            form.values.push(name, value);
        }
    }
    Ok(form)
}

fn multipart_error(e: multer::Error) -> Error {
    match e {
        multer::Error::StreamSizeExceeded { .. } => Error::payload_too_large(e),
        e => Error::bad_request(e),
    }
}
