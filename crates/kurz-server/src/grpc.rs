//! gRPC surface: mirror of the HTTP API.
//!
//! Authentication travels as request metadata under the configured cookie
//! name (lowercased, as metadata keys must be). `Login` is the only method
//! exempt from auth; it issues a fresh token. The trusted-subnet gate reads
//! the `x-real-ip` metadata value.

use std::net::IpAddr;
use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::error;

use kurz_core::UserId;
use kurz_proto_schema::v1 as proto;
use kurz_proto_schema::v1::shortener_server::Shortener;

use crate::service::{ServiceError, ShortenerService};

impl From<ServiceError> for Status {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(message) => Status::invalid_argument(message),
            ServiceError::NotFound(token) => Status::not_found(format!("url {token} not found")),
            ServiceError::Gone => Status::not_found("url was deleted"),
            ServiceError::Forbidden => Status::permission_denied("forbidden"),
            ServiceError::Storage(err) => {
                error!(%err, "storage failure");
                Status::internal("storage operation failed")
            }
        }
    }
}

pub struct ShortenerGrpcServer {
    service: Arc<ShortenerService>,
    metadata_key: String,
}

impl ShortenerGrpcServer {
    pub fn new(service: Arc<ShortenerService>, cookie_name: &str) -> Self {
        Self {
            service,
            metadata_key: cookie_name.to_ascii_lowercase(),
        }
    }

    /// Recovers the calling user from request metadata. Every method except
    /// `Login` goes through here.
    fn authorize<T>(&self, request: &Request<T>) -> Result<UserId, Status> {
        let value = request
            .metadata()
            .get(self.metadata_key.as_str())
            .ok_or_else(|| Status::unauthenticated("authorization token is not provided"))?;
        let token = value
            .to_str()
            .map_err(|_| Status::unauthenticated("authorization token is not valid"))?;

        self.service
            .auth()
            .decode(token)
            .map_err(|err| Status::unauthenticated(format!("access token is invalid: {err}")))
    }

    fn real_ip<T>(request: &Request<T>) -> Option<IpAddr> {
        request
            .metadata()
            .get("x-real-ip")?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

#[tonic::async_trait]
impl Shortener for ShortenerGrpcServer {
    async fn login(
        &self,
        _request: Request<proto::LoginRequest>,
    ) -> Result<Response<proto::LoginResponse>, Status> {
        let (token, _) = self
            .service
            .auth()
            .generate()
            .map_err(|err| Status::internal(err.to_string()))?;
        Ok(Response::new(proto::LoginResponse { token }))
    }

    async fn shorten_url(
        &self,
        request: Request<proto::ShortenUrlRequest>,
    ) -> Result<Response<proto::ShortenUrlResponse>, Status> {
        let user = self.authorize(&request)?;
        let shortened = self
            .service
            .shorten(user, &request.into_inner().original_url)
            .await?;

        if shortened.duplicate {
            // The canonical short URL rides in the status message.
            return Err(Status::already_exists(shortened.short_url));
        }

        Ok(Response::new(proto::ShortenUrlResponse {
            short_url: shortened.short_url,
        }))
    }

    async fn shorten_batch(
        &self,
        request: Request<proto::ShortenBatchRequest>,
    ) -> Result<Response<proto::ShortenBatchResponse>, Status> {
        let user = self.authorize(&request)?;
        let items = request
            .into_inner()
            .items
            .into_iter()
            .map(|item| (item.correlation_id, item.original_url))
            .collect();

        let results = self.service.shorten_batch(user, items).await?;
        Ok(Response::new(proto::ShortenBatchResponse {
            items: results
                .into_iter()
                .map(|result| proto::shorten_batch_response::Item {
                    correlation_id: result.correlation_id,
                    short_url: result.short_url,
                })
                .collect(),
        }))
    }

    async fn resolve_url(
        &self,
        request: Request<proto::ResolveUrlRequest>,
    ) -> Result<Response<proto::ResolveUrlResponse>, Status> {
        self.authorize(&request)?;
        let original_url = self.service.resolve(&request.into_inner().short_url).await?;
        Ok(Response::new(proto::ResolveUrlResponse { original_url }))
    }

    async fn list_user_urls(
        &self,
        request: Request<proto::ListUserUrlsRequest>,
    ) -> Result<Response<proto::ListUserUrlsResponse>, Status> {
        let user = self.authorize(&request)?;
        let urls = self.service.user_urls(user).await?;
        Ok(Response::new(proto::ListUserUrlsResponse {
            urls: urls
                .into_iter()
                .map(|pair| proto::list_user_urls_response::Pair {
                    short_url: pair.short_url,
                    original_url: pair.original_url,
                })
                .collect(),
        }))
    }

    async fn delete_user_urls(
        &self,
        request: Request<proto::DeleteUserUrlsRequest>,
    ) -> Result<Response<proto::DeleteUserUrlsResponse>, Status> {
        let user = self.authorize(&request)?;
        self.service
            .delete_urls(user, request.into_inner().short_urls)
            .await?;
        Ok(Response::new(proto::DeleteUserUrlsResponse {}))
    }

    async fn get_internal_stats(
        &self,
        request: Request<proto::GetInternalStatsRequest>,
    ) -> Result<Response<proto::GetInternalStatsResponse>, Status> {
        self.authorize(&request)?;
        let real_ip = Self::real_ip(&request);
        let stats = self.service.internal_stats(real_ip).await?;
        Ok(Response::new(proto::GetInternalStatsResponse {
            urls: stats.urls,
            users: stats.users,
        }))
    }

    async fn ping(
        &self,
        request: Request<proto::PingRequest>,
    ) -> Result<Response<proto::PingResponse>, Status> {
        self.authorize(&request)?;
        self.service.ping().await?;
        Ok(Response::new(proto::PingResponse {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurz_core::{StorageError, TokenCodec};
    use kurz_storage::{spawn_delete_pool, MemoryStorage};
    use tonic::metadata::MetadataValue;
    use tonic::Code;

    const COOKIE_NAME: &str = "kurz_auth";

    fn server_with_subnet(subnet: Option<&str>) -> ShortenerGrpcServer {
        let storage: Arc<dyn kurz_core::Storage> = Arc::new(MemoryStorage::open("").unwrap());
        let (deletes, _pool) = spawn_delete_pool(Arc::clone(&storage));
        let service = Arc::new(ShortenerService::new(
            storage,
            deletes,
            TokenCodec::new(&b"test secret"[..]),
            "http://sh.rt".to_string(),
            subnet.map(|s| s.parse().unwrap()),
        ));
        ShortenerGrpcServer::new(service, COOKIE_NAME)
    }

    fn server() -> ShortenerGrpcServer {
        server_with_subnet(None)
    }

    fn authed<T>(server: &ShortenerGrpcServer, message: T) -> Request<T> {
        let (token, _) = server.service.auth().generate().unwrap();
        let mut request = Request::new(message);
        request.metadata_mut().insert(
            COOKIE_NAME,
            MetadataValue::try_from(token.as_str()).unwrap(),
        );
        request
    }

    #[tokio::test]
    async fn login_issues_a_decodable_token() {
        let server = server();
        let response = server
            .login(Request::new(proto::LoginRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert!(server.service.auth().decode(&response.token).is_ok());
    }

    #[tokio::test]
    async fn protected_method_without_metadata_is_unauthenticated() {
        let server = server();
        let status = server
            .shorten_url(Request::new(proto::ShortenUrlRequest {
                original_url: "http://abc.test".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::Unauthenticated);
    }

    #[tokio::test]
    async fn garbage_token_is_unauthenticated() {
        let server = server();
        let mut request = Request::new(proto::ShortenUrlRequest {
            original_url: "http://abc.test".to_string(),
        });
        request
            .metadata_mut()
            .insert(COOKIE_NAME, MetadataValue::try_from("beef").unwrap());

        let status = server.shorten_url(request).await.unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
    }

    #[tokio::test]
    async fn shorten_then_resolve_round_trips() {
        let server = server();

        let response = server
            .shorten_url(authed(
                &server,
                proto::ShortenUrlRequest {
                    original_url: "http://abc.test".to_string(),
                },
            ))
            .await
            .unwrap()
            .into_inner();
        assert!(response.short_url.starts_with("http://sh.rt/"));

        let token = response.short_url.rsplit('/').next().unwrap().to_string();
        let resolved = server
            .resolve_url(authed(&server, proto::ResolveUrlRequest { short_url: token }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resolved.original_url, "http://abc.test");
    }

    #[tokio::test]
    async fn duplicate_shorten_is_already_exists_with_canonical_url() {
        let server = server();
        let request = || proto::ShortenUrlRequest {
            original_url: "http://abc.test".to_string(),
        };

        let first = server
            .shorten_url(authed(&server, request()))
            .await
            .unwrap()
            .into_inner();

        // The second request must come from the same user to collide, so
        // reuse one token for both.
        let (token, _) = server.service.auth().generate().unwrap();
        let with_token = |message| {
            let mut req = Request::new(message);
            req.metadata_mut().insert(
                COOKIE_NAME,
                MetadataValue::try_from(token.as_str()).unwrap(),
            );
            req
        };

        let created = server
            .shorten_url(with_token(proto::ShortenUrlRequest {
                original_url: "http://other.test".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        let status = server
            .shorten_url(with_token(proto::ShortenUrlRequest {
                original_url: "http://other.test".to_string(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::AlreadyExists);
        assert_eq!(status.message(), created.short_url);
        assert_ne!(created.short_url, first.short_url);
    }

    #[tokio::test]
    async fn unknown_token_resolves_to_not_found() {
        let server = server();
        let status = server
            .resolve_url(authed(
                &server,
                proto::ResolveUrlRequest {
                    short_url: "nope1".to_string(),
                },
            ))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn stats_without_trusted_metadata_is_permission_denied() {
        let server = server_with_subnet(Some("10.0.0.0/8"));
        let status = server
            .get_internal_stats(authed(&server, proto::GetInternalStatsRequest {}))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::PermissionDenied);
    }

    #[tokio::test]
    async fn stats_with_trusted_ip_answer_counts() {
        let server = server_with_subnet(Some("10.0.0.0/8"));
        server
            .shorten_url(authed(
                &server,
                proto::ShortenUrlRequest {
                    original_url: "http://abc.test".to_string(),
                },
            ))
            .await
            .unwrap();

        let mut request = authed(&server, proto::GetInternalStatsRequest {});
        request
            .metadata_mut()
            .insert("x-real-ip", MetadataValue::try_from("10.1.2.3").unwrap());

        let stats = server
            .get_internal_stats(request)
            .await
            .unwrap()
            .into_inner();
        assert_eq!(stats.urls, 1);
        assert_eq!(stats.users, 1);
    }

    #[test]
    fn service_errors_map_to_expected_codes() {
        let cases: Vec<(ServiceError, Code)> = vec![
            (
                ServiceError::InvalidInput("bad".to_string()),
                Code::InvalidArgument,
            ),
            (
                ServiceError::NotFound("abc12".to_string()),
                Code::NotFound,
            ),
            (ServiceError::Gone, Code::NotFound),
            (ServiceError::Forbidden, Code::PermissionDenied),
            (
                ServiceError::Storage(StorageError::Query("boom".to_string())),
                Code::Internal,
            ),
        ];

        for (err, expected) in cases {
            let status: Status = err.into();
            assert_eq!(status.code(), expected);
        }
    }
}
