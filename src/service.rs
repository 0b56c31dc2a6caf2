use crate::codec::Encoding;
use crate::future::ResponseFuture;
use crate::policy::CompressionPolicy;
use http::{Request, Uri, header};
use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that compresses responses for allow-listed requests.
#[derive(Debug, Clone)]
pub struct CompressionService<S> {
    inner: S,
    policy: Arc<CompressionPolicy>,
    min_size: usize,
}

impl<S> CompressionService<S> {
    /// Wraps `inner`, compressing only what `policy` allows.
    pub fn new(inner: S, policy: Arc<CompressionPolicy>, min_size: usize) -> Self {
        Self {
            inner,
            policy,
            min_size,
        }
    }

    /// Returns the policy deciding which requests may be compressed.
    pub fn policy(&self) -> &CompressionPolicy {
        &self.policy
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CompressionService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
{
    type Response = http::Response<crate::body::CompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let encoding = {
            let path = decoded_path(req.uri());
            if self.policy.is_eligible(req.method(), &path) {
                req.headers()
                    .get(header::ACCEPT_ENCODING)
                    .and_then(|v| v.to_str().ok())
                    .and_then(Encoding::negotiate)
            } else {
                tracing::debug!(
                    method = %req.method(),
                    path = %path,
                    "path not on compression allow-list"
                );
                None
            }
        };

        ResponseFuture::new(self.inner.call(req), encoding, self.min_size)
    }
}

/// Percent-decodes the request path, keeping it as is if it is not UTF-8.
fn decoded_path(uri: &Uri) -> Cow<'_, str> {
    let raw = uri.path();
    percent_decode_str(raw)
        .decode_utf8()
        .unwrap_or(Cow::Borrowed(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompressionLayer;
    use bytes::Bytes;
    use http::{Method, Response};
    use http_body_util::{BodyExt, Full};
    use std::convert::Infallible;
    use std::future::{Future, ready};
    use tower::{Layer, ServiceExt, service_fn};

    /// Polls `fut` once; everything in these tests completes synchronously.
    fn resolve<F: Future>(fut: F) -> F::Output {
        let mut fut = std::pin::pin!(fut);
        let mut cx = Context::from_waker(std::task::Waker::noop());
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(output) => output,
            Poll::Pending => panic!("future did not complete"),
        }
    }

    fn call(
        layer: &CompressionLayer,
        method: Method,
        uri: &str,
        accept_encoding: Option<&str>,
    ) -> Response<crate::CompressionBody<Full<Bytes>>> {
        let svc = layer.layer(service_fn(|_req: Request<()>| {
            ready(Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(
                "{\"results\": []}".repeat(100),
            )))))
        }));

        let mut req = Request::builder().method(method).uri(uri);
        if let Some(value) = accept_encoding {
            req = req.header(header::ACCEPT_ENCODING, value);
        }

        resolve(svc.oneshot(req.body(()).unwrap())).unwrap()
    }

    fn builtin_layer() -> CompressionLayer {
        CompressionLayer::new(CompressionPolicy::builtin().unwrap())
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_post_query_is_compressed() {
        let response = call(
            &builtin_layer(),
            Method::POST,
            "/api/projects/42/query",
            Some("gzip"),
        );

        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
        let body = resolve(response.into_body().collect()).unwrap().to_bytes();
        assert_eq!(&body[..2], &[0x1f, 0x8b]);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_post_outside_allow_list_is_not_compressed() {
        let response = call(
            &builtin_layer(),
            Method::POST,
            "/api/projects/42/insights",
            Some("gzip"),
        );

        assert!(!response.body().is_encoded());
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(response.headers().get(header::VARY).is_none());

        let body = resolve(response.into_body().collect()).unwrap().to_bytes();
        assert!(body.starts_with(b"{\"results\""));
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_query_string_is_ignored() {
        let response = call(
            &builtin_layer(),
            Method::GET,
            "/api/projects/42/insights/?refresh=true",
            Some("gzip, deflate"),
        );

        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
    }

    #[test]
    fn test_eligible_without_accept_encoding() {
        let response = call(
            &builtin_layer(),
            Method::GET,
            "/api/projects/42/insights/",
            None,
        );

        assert!(!response.body().is_encoded());
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_custom_allow_list() {
        let policy = CompressionPolicy::from_lookup(|name| {
            (name == crate::policy::RESPONSE_ALLOW_LIST_VAR).then(|| "^/foo/?$".to_string())
        })
        .unwrap();
        let layer = CompressionLayer::new(policy);

        let foo = call(&layer, Method::GET, "/foo", Some("gzip"));
        assert!(foo.body().is_encoded());

        let bar = call(&layer, Method::GET, "/bar", Some("gzip"));
        assert!(!bar.body().is_encoded());
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_min_size_applies_to_allowed_paths() {
        let layer = builtin_layer().min_size(1 << 20);
        let svc = layer.layer(service_fn(|_req: Request<()>| {
            ready(Ok::<_, Infallible>(
                Response::builder()
                    .header(header::CONTENT_LENGTH, "15")
                    .body(Full::new(Bytes::from("{\"results\": []}")))
                    .unwrap(),
            ))
        }));
        let req = Request::get("/api/projects/1/cohorts")
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(())
            .unwrap();

        let response = resolve(svc.oneshot(req)).unwrap();
        assert!(!response.body().is_encoded());
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "15");
    }

    #[test]
    fn test_service_exposes_policy() {
        let svc = builtin_layer().layer(service_fn(|_req: Request<()>| {
            ready(Ok::<_, Infallible>(Response::new(Full::new(Bytes::new()))))
        }));
        assert_eq!(svc.policy().post_allow_list().len(), 1);
    }

    #[test]
    fn test_decoded_path() {
        let uri: Uri = "/api/projects/%34%32/query?x=%31".parse().unwrap();
        assert_eq!(decoded_path(&uri), "/api/projects/42/query");

        let uri: Uri = "/uploaded_media/a%20b.png".parse().unwrap();
        assert_eq!(decoded_path(&uri), "/uploaded_media/a b.png");

        // not valid UTF-8 once decoded
        let uri: Uri = "/api/%ff/query".parse().unwrap();
        assert_eq!(decoded_path(&uri), "/api/%ff/query");
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_percent_encoded_path_is_matched_decoded() {
        let response = call(
            &builtin_layer(),
            Method::POST,
            "/api/projects/%34%32/query",
            Some("gzip"),
        );
        assert!(response.body().is_encoded());

        let response = call(
            &builtin_layer(),
            Method::POST,
            "/api/projects/%34%32/insights",
            Some("gzip"),
        );
        assert!(!response.body().is_encoded());
    }
}
