use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};

/// Appends the project's browser API key as the `key` query parameter.
///
/// Client-side Firebase endpoints identify the project by API key rather than by an
/// OAuth bearer token.
#[derive(Clone)]
pub struct ApiKeyMiddleware {
    api_key: String,
}

impl ApiKeyMiddleware {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for ApiKeyMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let already_keyed = req.url().query_pairs().any(|(name, _)| name == "key");
        if !already_keyed {
            req.url_mut()
                .query_pairs_mut()
                .append_pair("key", &self.api_key);
        }

        next.run(req, extensions).await
    }
}
