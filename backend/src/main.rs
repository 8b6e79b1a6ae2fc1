mod auth;
mod config;
mod db;
mod ml;
mod routes;
mod services;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;

use auth::jwt::JwtService;
use auth::middleware::AuthMiddleware;
use config::Settings;
use db::dynamodb_repository::DynamoDbRepository;
use ml::dispatcher::PipelineDispatcher;
use ml::pipeline::PipelineContext;
use ml::registry::Registry;
use routes::configure_routes;
use services::diagnosis_service::DiagnosisService;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let settings = Settings::from_env();

    if let Ok(current_dir) = std::env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }
    log::info!(
        "Serving {} disease pipelines, artifacts under {}",
        Registry::builtin().len(),
        settings.model_root.display()
    );

    let dispatcher = Arc::new(PipelineDispatcher::new(
        Registry::builtin(),
        PipelineContext::new(settings.model_root.clone()),
    ));
    if settings.preload_models {
        // Best effort: a pipeline whose artifacts are missing stays lazy
        // and retries on its first request.
        dispatcher.warm_up();
    }

    let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let dynamodb_client = DynamoDbClient::new(&aws_config);
    let db_repo = DynamoDbRepository::new(
        dynamodb_client,
        settings.users_table.clone(),
        settings.patients_table.clone(),
        settings.diagnoses_table.clone(),
    );
    let diagnosis_service = DiagnosisService::new(db_repo.clone());

    let jwt_service = JwtService::new(&settings.jwt_secret);
    let auth_middleware = AuthMiddleware::new(jwt_service.clone());

    let bind_address = format!("0.0.0.0:{}", settings.port);
    log::info!("Starting server on {}", bind_address);

    let app_settings = settings.clone();
    HttpServer::new(move || {
        let cors = if app_settings.cors_origins.is_empty() {
            Cors::default().allow_any_origin()
        } else {
            app_settings
                .cors_origins
                .iter()
                .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        }
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            actix_web::http::header::AUTHORIZATION,
            actix_web::http::header::ACCEPT,
            actix_web::http::header::CONTENT_TYPE,
        ])
        .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_settings.clone()))
            .app_data(web::Data::new(dispatcher.clone()))
            .app_data(web::Data::new(db_repo.clone()))
            .app_data(web::Data::new(diagnosis_service.clone()))
            .app_data(web::Data::new(jwt_service.clone()))
            .configure(configure_routes)
            .configure(auth::routes::configure_routes)
            .wrap(auth_middleware.clone())
            .wrap(cors)
    })
    .bind(&bind_address)?
    .run()
    .await
}
