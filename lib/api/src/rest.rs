use actix_cors::Cors;
use actix_web::{error, web, App, HttpRequest, HttpResponse, HttpServer, Result as ActixResult};
use followgraph_core::{FollowError, Relationship, RelationshipService, ShutdownSignal, UserId};
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub workers: Option<usize>,
    /// Seconds to let in-flight requests finish on shutdown
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8082)),
            workers: None,
            shutdown_timeout: 10,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FollowRequest {
    follower_id: UserId,
    followed_user_id: UserId,
}

pub struct RestApi;

impl RestApi {
    /// Serve until `shutdown` fires, then drain in-flight requests.
    pub async fn start(
        service: RelationshipService,
        config: ServerConfig,
        mut shutdown: ShutdownSignal,
    ) -> std::io::Result<()> {
        let mut server = HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new()
                .wrap(cors)
                .configure(Self::configure(service.clone()))
        })
        .disable_signals()
        .shutdown_timeout(config.shutdown_timeout);

        if let Some(workers) = config.workers {
            server = server.workers(workers);
        }

        let server = server.bind(config.bind)?.run();
        info!(bind = %config.bind, "HTTP server listening");

        let handle = server.handle();
        actix_web::rt::spawn(async move {
            shutdown.recv().await;
            info!("HTTP server stopping");
            handle.stop(true).await;
        });

        server.await
    }

    /// Routes, extractor settings and shared state, without middleware.
    pub fn configure(service: RelationshipService) -> impl FnOnce(&mut web::ServiceConfig) {
        move |cfg| {
            cfg.app_data(web::Data::new(service))
                .app_data(json_config())
                .app_data(path_config())
                .route("/followers", web::post().to(create_follow_from_json))
                .route("/follow/{followed_id}/{follower_id}", web::post().to(create_follow_from_path))
                .route("/health", web::get().to(health));
        }
    }
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req: &HttpRequest| {
        let response = HttpResponse::BadRequest().json(serde_json::json!({
            "error": err.to_string()
        }));
        error::InternalError::from_response(err, response).into()
    })
}

fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _req: &HttpRequest| {
        let response = HttpResponse::BadRequest().json(serde_json::json!({
            "error": "user ids must be integers"
        }));
        error::InternalError::from_response(err, response).into()
    })
}

async fn create_follow_from_json(
    service: web::Data<RelationshipService>,
    req: web::Json<FollowRequest>,
) -> ActixResult<HttpResponse> {
    let FollowRequest { follower_id, followed_user_id } = req.into_inner();
    Ok(follow_response(service.create_follow(follower_id, followed_user_id).await))
}

/// Path order is followed first, then follower.
async fn create_follow_from_path(
    service: web::Data<RelationshipService>,
    path: web::Path<(UserId, UserId)>,
) -> ActixResult<HttpResponse> {
    let (followed_id, follower_id) = path.into_inner();
    Ok(follow_response(service.create_follow(follower_id, followed_id).await))
}

async fn health() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "UP"
    })))
}

fn follow_response(result: Result<Relationship, FollowError>) -> HttpResponse {
    match result {
        Ok(relationship) => HttpResponse::Created().json(relationship),
        Err(FollowError::FollowerNotFound(id)) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "follower does not exist",
            "userId": id
        })),
        Err(FollowError::FollowedNotFound(id)) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "followed user does not exist",
            "userId": id
        })),
        Err(FollowError::Store(e)) => {
            error!(error = %e, "follow request failed");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "internal server error"
            }))
        }
    }
}
