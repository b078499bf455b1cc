use actix_web::{web, HttpResponse};

use crate::api::dto::{IdResponse, LoginRequest, RefreshRequest, RegisterRequest, TokenPairResponse};
use crate::api::{with_timeout, AppState};
use crate::error::AppResult;

pub async fn register(state: web::Data<AppState>, body: web::Json<RegisterRequest>) -> AppResult<HttpResponse> {
    let id = with_timeout(state.request_timeout, state.users.register(body.into_inner().into())).await?;
    Ok(HttpResponse::Created().json(IdResponse::ok(id)))
}

pub async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> AppResult<HttpResponse> {
    let LoginRequest { email, password } = body.into_inner();
    let email = email.trim().to_lowercase();

    let pair = with_timeout(state.request_timeout, state.sessions.authenticate(&email, &password)).await?;
    Ok(HttpResponse::Ok().json(TokenPairResponse::from(pair)))
}

pub async fn refresh(state: web::Data<AppState>, body: web::Json<RefreshRequest>) -> AppResult<HttpResponse> {
    let pair = with_timeout(state.request_timeout, state.sessions.refresh(&body.refresh_token)).await?;
    Ok(HttpResponse::Ok().json(TokenPairResponse::from(pair)))
}

pub async fn logout(state: web::Data<AppState>, body: web::Json<RefreshRequest>) -> AppResult<HttpResponse> {
    with_timeout(state.request_timeout, state.sessions.logout(&body.refresh_token)).await?;
    Ok(HttpResponse::NoContent().finish())
}
