use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::{
    BoxError, SubscriptionClient, SubscriptionRequest, SubscriptionResponse, TransportFactory,
    TransportOptions,
};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("build http client: {0}")]
    BuildClient(reqwest::Error),
    #[error("subscription request: {0}")]
    Request(reqwest::Error),
    #[error("read subscription body: {0}")]
    ReadBody(reqwest::Error),
    #[error("http3 transport requires a quic-capable dialer; none is configured")]
    Http3Unavailable,
    #[error("detour transport requires a dialer; none is configured")]
    DetourUnavailable,
}

/// Builds the built-in HTTP/2-preferred subscription client. HTTP/3 and
/// detour routing need the dialer collaborator; a node wired without one
/// rejects those options here instead of fetching over the wrong transport.
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, options: &TransportOptions) -> Result<Arc<dyn SubscriptionClient>, BoxError> {
        if options.http3 {
            return Err(Box::new(TransportError::Http3Unavailable));
        }
        if options.detour.is_some() {
            return Err(Box::new(TransportError::DetourUnavailable));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(TransportError::BuildClient)?;
        Ok(Arc::new(HttpSubscriptionClient { client }))
    }
}

pub struct HttpSubscriptionClient {
    client: reqwest::Client,
}

#[async_trait]
impl SubscriptionClient for HttpSubscriptionClient {
    async fn fetch(&self, request: SubscriptionRequest) -> Result<SubscriptionResponse, BoxError> {
        let mut builder = self.client.get(&request.url).headers(request.headers);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|source| Box::new(TransportError::Request(source)) as BoxError)?;
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|source| Box::new(TransportError::ReadBody(source)) as BoxError)?
            .to_vec();
        Ok(SubscriptionResponse { headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http3_needs_an_injected_dialer() {
        let factory = DefaultTransportFactory;
        let err = factory
            .create(&TransportOptions {
                http3: true,
                detour: None,
            })
            .unwrap_err();
        assert!(err.to_string().contains("http3"));
    }

    #[test]
    fn plain_http2_client_builds() {
        let factory = DefaultTransportFactory;
        assert!(factory
            .create(&TransportOptions {
                http3: false,
                detour: None,
            })
            .is_ok());
    }
}
