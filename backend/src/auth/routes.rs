use actix_web::{web, HttpResponse, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::jwt::JwtService;
use super::middleware::AuthenticatedUser;
use super::models::{AuthResponse, AuthUser, LoginRequest, RegisterRequest};
use crate::db::dynamodb_repository::DynamoDbRepository;
use crate::db::models::User;

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/auth/register").route(web::post().to(register)))
        .service(web::resource("/api/auth/login").route(web::post().to(login)))
        .service(web::resource("/api/auth/me").route(web::get().to(me)));
}

pub fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

async fn register(
    body: web::Json<RegisterRequest>,
    db_repo: web::Data<DynamoDbRepository>,
) -> Result<HttpResponse> {
    let req = body.into_inner();
    if req.email.trim().is_empty() || !req.email.contains('@') {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "Invalid email address".to_string(),
        }));
    }
    if req.password.len() < 8 {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "Password must be at least 8 characters".to_string(),
        }));
    }

    match db_repo.get_user_by_email(&req.email).await {
        Ok(Some(_)) => {
            return Ok(HttpResponse::BadRequest().json(ErrorResponse {
                error: "Email already registered".to_string(),
            }));
        }
        Ok(None) => {}
        Err(e) => {
            log::error!("User lookup failed during registration: {:?}", e);
            return Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Registration failed".to_string(),
            }));
        }
    }

    let salt = generate_salt();
    let password_hash = hash_password(&req.password, &salt);
    let user = User::new(req.email, req.full_name, password_hash, salt);

    if let Err(e) = db_repo.create_user(&user).await {
        log::error!("Failed to create user {}: {:?}", user.email, e);
        return Ok(HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Registration failed".to_string(),
        }));
    }

    Ok(HttpResponse::Created().json(AuthUser::from(user)))
}

async fn login(
    body: web::Json<LoginRequest>,
    db_repo: web::Data<DynamoDbRepository>,
    jwt_service: web::Data<JwtService>,
) -> Result<HttpResponse> {
    let req = body.into_inner();

    let user = match db_repo.get_user_by_email(&req.email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Ok(HttpResponse::Unauthorized().json(ErrorResponse {
                error: "Invalid credentials".to_string(),
            }));
        }
        Err(e) => {
            log::error!("User lookup failed during login: {:?}", e);
            return Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Login failed".to_string(),
            }));
        }
    };

    if !user.is_active || hash_password(&req.password, &user.salt) != user.password_hash {
        return Ok(HttpResponse::Unauthorized().json(ErrorResponse {
            error: "Invalid credentials".to_string(),
        }));
    }

    let token = match jwt_service.generate_token(&user) {
        Ok(token) => token,
        Err(e) => {
            log::error!("Token generation failed for {}: {:?}", user.email, e);
            return Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Login failed".to_string(),
            }));
        }
    };

    if let Err(e) = db_repo.update_last_login(user.id).await {
        // Login still succeeds; the timestamp is advisory.
        log::warn!("Failed to update last_login for {}: {:?}", user.email, e);
    }

    Ok(HttpResponse::Ok().json(AuthResponse {
        token,
        user: AuthUser::from(user),
    }))
}

async fn me(
    user: AuthenticatedUser,
    db_repo: web::Data<DynamoDbRepository>,
) -> Result<HttpResponse> {
    if user.0.is_nil() {
        return Ok(HttpResponse::Unauthorized().json(ErrorResponse {
            error: "Invalid user ID".to_string(),
        }));
    }

    match db_repo.get_user_by_id(user.0).await {
        Ok(Some(user_data)) => Ok(HttpResponse::Ok().json(AuthUser::from(user_data))),
        Ok(None) => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: "User not found".to_string(),
        })),
        Err(e) => {
            log::error!("Failed to fetch user {}: {:?}", user.0, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to fetch user".to_string(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_different_salt_hashes_differently() {
        let a = hash_password("hunter22", &generate_salt());
        let b = hash_password("hunter22", &generate_salt());
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_stable_for_fixed_salt() {
        let salt = "0011223344556677";
        assert_eq!(
            hash_password("hunter22", salt),
            hash_password("hunter22", salt)
        );
    }
}
