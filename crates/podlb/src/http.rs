use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};

pub type Body = BoxBody<Bytes, hyper::Error>;
pub type Request = ::http::Request<hyper::body::Incoming>;
pub type Response = ::http::Response<Body>;

pub use ::http::uri::{Authority, Scheme};
pub use ::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};

pub fn empty_body() -> Body {
	Empty::new().map_err(|never| match never {}).boxed()
}

pub fn text_body(text: impl Into<Bytes>) -> Body {
	Full::new(text.into()).map_err(|never| match never {}).boxed()
}
