pub use client::{Client, ClientError, HeaderMap, Method, Response, StatusCode};
pub use uri::{InvalidUriError, Uri};

mod uri {
    use std::fmt::Display;
    use std::str::FromStr;

    use thiserror::Error;

    #[derive(Debug, Error)]
    pub struct InvalidUriError(String);

    impl Display for InvalidUriError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.fmt(f)
        }
    }

    impl From<http::uri::InvalidUri> for InvalidUriError {
        fn from(value: http::uri::InvalidUri) -> Self {
            InvalidUriError(value.to_string())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct Uri(http::Uri);

    impl Uri {
        pub fn new(uri: http::Uri) -> Self {
            Self(uri)
        }

        pub fn scheme(&self) -> Option<&str> {
            self.0.scheme_str()
        }

        pub fn host(&self) -> Option<&str> {
            self.0.host()
        }

        pub fn port(&self) -> Option<u16> {
            self.0.port_u16()
        }
    }

    impl Display for Uri {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            self.0.fmt(f)
        }
    }

    impl FromStr for Uri {
        type Err = InvalidUriError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Ok(http::Uri::from_str(s).map(Self::new)?)
        }
    }

}

mod client {
    use futures_lite::{Stream, StreamExt};
    use reqwest::RequestBuilder;

    use super::uri::Uri;

    pub type Method = reqwest::Method;
    pub type StatusCode = reqwest::StatusCode;
    pub type HeaderMap = reqwest::header::HeaderMap;

    #[derive(Debug, thiserror::Error)]
    pub enum ClientError {
        #[error("failed to build client: {0}")]
        Build(reqwest::Error),

        #[error(transparent)]
        Client(reqwest::Error),

        #[error(transparent)]
        Server(reqwest::Error),
    }

    #[derive(Debug)]
    pub struct Response(reqwest::Response);

    impl Response {
        pub fn status(&self) -> StatusCode {
            self.0.status()
        }

        pub fn headers(&self) -> &HeaderMap {
            self.0.headers()
        }

        /// Length of the body as reported by the server, if any
        pub fn content_length(&self) -> Option<u64> {
            self.0.content_length()
        }

        pub fn stream(self) -> impl Stream<Item = Result<Vec<u8>, ClientError>> {
            self.0
                .bytes_stream()
                .map(|res| res.map(|bytes| bytes.to_vec()).map_err(ClientError::Server))
        }
    }

    /// HTTP client verifying server identity against the bundled
    /// webpki root certificates.
    #[derive(Debug, Clone)]
    pub struct Client {
        client: reqwest::Client,
    }

    impl Client {
        /// Create a new client
        ///
        /// When `https_only` is set, requests to plain `http` URIs are refused.
        pub fn new(https_only: bool) -> Result<Self, ClientError> {
            let client = reqwest::Client::builder()
                .use_rustls_tls()
                .tls_built_in_webpki_certs(true)
                .https_only(https_only)
                .build()
                .map_err(ClientError::Build)?;

            Ok(Self { client })
        }

        /// Thin wrapper around [reqwest::Request], this is your gateway to
        /// a fully customizable client if this type's methods won't do.
        pub async fn request<D>(
            &self,
            method: Method,
            uri: &Uri,
            decorator: D,
        ) -> Result<Response, ClientError>
        where
            D: FnOnce(RequestBuilder) -> RequestBuilder,
        {
            let request = decorator(self.client.request(method, uri.to_string()));
            Ok(Response(request.send().await.map_err(ClientError::Client)?))
        }
    }
}
