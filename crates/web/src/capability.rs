//! Representation capabilities.
//!
//! A capability is a named way of turning a response value into bytes. The
//! server keeps a [`CapabilityRegistry`] mapping Accept tokens (`"html"`,
//! `"text/xml"`, ...) to capabilities. A response type states which
//! capabilities it satisfies in [`Representable::declare`], and each
//! satisfied capability is a [`Render`] impl, so a type that claims a
//! capability without rendering it does not compile.
//!
//! ```
//! use courier_web::capability::{Capabilities, Html, Json, Render, Representable};
//!
//! struct Greeting(String);
//!
//! impl Render<Html> for Greeting {
//!     fn render(&self) -> Vec<u8> {
//!         format!("<p>{}</p>", self.0).into_bytes()
//!     }
//! }
//!
//! impl Render<Json> for Greeting {
//!     fn render(&self) -> Vec<u8> {
//!         Json::to_vec(&self.0)
//!     }
//! }
//!
//! impl Representable for Greeting {
//!     fn declare(caps: &mut Capabilities<Self>) {
//!         caps.satisfy::<Html>().satisfy::<Json>();
//!     }
//! }
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use http::HeaderMap;
use http::header::ACCEPT;
use serde::Serialize;
use tracing::error;

use crate::body::ResponseBody;
use crate::negotiate::negotiate_representation;

/// A rendering contract, identified by its type.
pub trait Capability: 'static {
    /// Written as the response `Content-Type` when this capability renders.
    const CONTENT_TYPE: Option<&'static str> = None;
}

/// Renders `Self` for capability `C`.
pub trait Render<C: Capability> {
    fn render(&self) -> Vec<u8>;
}

#[derive(Debug, Clone, Copy)]
pub struct Html;

impl Capability for Html {
    const CONTENT_TYPE: Option<&'static str> = Some("text/html; charset=utf-8");
}

#[derive(Debug, Clone, Copy)]
pub struct Csv;

impl Capability for Csv {
    const CONTENT_TYPE: Option<&'static str> = Some("text/csv");
}

#[derive(Debug, Clone, Copy)]
pub struct Json;

impl Capability for Json {
    const CONTENT_TYPE: Option<&'static str> = Some("application/json");
}

impl Json {
    /// Serializes `value`, logging and rendering nothing if it cannot be.
    pub fn to_vec<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
        serde_json::to_vec(value).unwrap_or_else(|e| {
            error!(cause = %e, "failed to serialize json representation");
            Vec::new()
        })
    }
}

/// Accept tokens and the capabilities they select.
#[derive(Clone)]
pub struct CapabilityRegistry {
    tokens: HashMap<String, TypeId>,
}

impl CapabilityRegistry {
    /// A registry without the built-in tokens.
    pub fn empty() -> Self {
        Self { tokens: HashMap::new() }
    }

    /// Associates `token` with `C`, replacing whatever the token meant before.
    pub fn register<C: Capability>(&mut self, token: impl Into<String>) -> &mut Self {
        self.tokens.insert(token.into(), TypeId::of::<C>());
        self
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for CapabilityRegistry {
    /// `html`, `csv` and `json` are registered.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register::<Html>("html").register::<Csv>("csv").register::<Json>("json");
        registry
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<&str> = self.tokens.keys().map(String::as_str).collect();
        tokens.sort_unstable();
        f.debug_struct("CapabilityRegistry").field("tokens", &tokens).finish()
    }
}

/// A response type: anything a handler or error handler returns.
pub trait Representable: Send + Sized + 'static {
    fn declare(caps: &mut Capabilities<Self>);
}

struct Renderer<T> {
    render: fn(&T) -> Vec<u8>,
    content_type: Option<&'static str>,
}

impl<T> Clone for Renderer<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Renderer<T> {}

/// What a response type declared about itself.
pub struct Capabilities<T> {
    renderers: HashMap<TypeId, Renderer<T>>,
    raw: Option<fn(T) -> ResponseBody>,
}

impl<T> Capabilities<T> {
    fn new() -> Self {
        Self { renderers: HashMap::new(), raw: None }
    }

    pub fn satisfy<C: Capability>(&mut self) -> &mut Self
    where
        T: Render<C>,
    {
        let renderer = Renderer { render: <T as Render<C>>::render, content_type: C::CONTENT_TYPE };
        self.renderers.insert(TypeId::of::<C>(), renderer);
        self
    }

    /// Lets the value be written as-is when no capability matches.
    pub fn raw(&mut self) -> &mut Self
    where
        T: Into<ResponseBody>,
    {
        self.raw = Some(<T as Into<ResponseBody>>::into);
        self
    }
}

impl<T> fmt::Debug for Capabilities<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("capabilities", &self.renderers.len())
            .field("raw", &self.raw.is_some())
            .finish()
    }
}

/// Which registered tokens a response type satisfies.
///
/// Built once per route (or error handler) from the registry as it stood at
/// registration time.
pub struct SatisfactionMap<T> {
    entries: HashMap<String, Renderer<T>>,
    raw: Option<fn(T) -> ResponseBody>,
}

/// The representation picked for one request.
pub(crate) enum Choice<'m, T> {
    Capability(&'m str),
    Raw(fn(T) -> ResponseBody),
}

/// A value turned into a body.
#[derive(Debug)]
pub(crate) struct Rendered {
    pub(crate) body: ResponseBody,
    pub(crate) content_type: Option<&'static str>,
    /// Bytes before any content encoding.
    pub(crate) len: u64,
}

impl<T: Representable> SatisfactionMap<T> {
    pub fn compute(registry: &CapabilityRegistry) -> Self {
        let mut caps = Capabilities::new();
        T::declare(&mut caps);

        let entries = registry
            .tokens
            .iter()
            .filter_map(|(token, capability)| caps.renderers.get(capability).map(|renderer| (token.clone(), *renderer)))
            .collect();
        Self { entries, raw: caps.raw }
    }
}

impl<T> SatisfactionMap<T> {
    pub fn is_satisfied(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }

    pub fn has_raw(&self) -> bool {
        self.raw.is_some()
    }

    /// Negotiates against the request's `Accept` header, falling back to the
    /// raw representation when one was declared.
    pub(crate) fn choose(&self, headers: &HeaderMap) -> Option<Choice<'_, T>> {
        let accept = headers.get(ACCEPT).and_then(|value| value.to_str().ok()).unwrap_or("");
        negotiate_representation(accept, |token| self.is_satisfied(token))
            .and_then(|token| self.entries.get_key_value(token))
            .map(|(token, _)| Choice::Capability(token.as_str()))
            .or_else(|| self.raw.map(Choice::Raw))
    }

    pub(crate) fn render(&self, choice: &Choice<'_, T>, value: T) -> Rendered {
        match choice {
            Choice::Capability(token) => match self.entries.get(*token) {
                Some(renderer) => {
                    let bytes = (renderer.render)(&value);
                    let len = bytes.len() as u64;
                    Rendered { body: ResponseBody::from(bytes), content_type: renderer.content_type, len }
                }
                None => Rendered { body: ResponseBody::empty(), content_type: None, len: 0 },
            },
            Choice::Raw(into_body) => {
                let body = into_body(value);
                let len = http_body::Body::size_hint(&body).lower();
                Rendered { body, content_type: None, len }
            }
        }
    }
}

impl<T> fmt::Debug for SatisfactionMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        tokens.sort_unstable();
        f.debug_struct("SatisfactionMap").field("tokens", &tokens).field("raw", &self.raw.is_some()).finish()
    }
}

macro_rules! raw_representable {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Representable for $ty {
                fn declare(caps: &mut Capabilities<Self>) {
                    caps.raw();
                }
            }
        )*
    };
}

raw_representable!(String, &'static str, Bytes, Vec<u8>, ());

impl Render<Json> for serde_json::Value {
    fn render(&self) -> Vec<u8> {
        Json::to_vec(self)
    }
}

impl Representable for serde_json::Value {
    fn declare(caps: &mut Capabilities<Self>) {
        caps.satisfy::<Json>();
    }
}
