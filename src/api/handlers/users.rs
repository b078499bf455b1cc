use actix_web::{web, HttpResponse};

use crate::api::dto::{IdResponse, ListUsersQuery, SetRoleRequest, UpdateUserRequest, UserListResponse, UserView};
use crate::api::{with_timeout, AppState};
use crate::auth::{AdminUser, AuthenticatedUser};
use crate::error::AppResult;
use crate::services::DEFAULT_PAGE_SIZE;

pub async fn get_user(
    state: web::Data<AppState>,
    _caller: AuthenticatedUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let user = with_timeout(state.request_timeout, state.users.get(path.into_inner())).await?;
    Ok(HttpResponse::Ok().json(UserView::from(user)))
}

pub async fn list_users(
    state: web::Data<AppState>,
    _caller: AuthenticatedUser,
    query: web::Query<ListUsersQuery>,
) -> AppResult<HttpResponse> {
    let ListUsersQuery { search, limit, offset } = query.into_inner();
    let page = with_timeout(state.request_timeout, state.users.list(search, limit, offset)).await?;

    // Echo the effective paging window back to the caller
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(HttpResponse::Ok().json(UserListResponse::new(page, limit, offset.unwrap_or(0))))
}

pub async fn set_role(
    state: web::Data<AppState>,
    AdminUser(admin): AdminUser,
    path: web::Path<i64>,
    body: web::Json<SetRoleRequest>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    with_timeout(state.request_timeout, state.users.set_role(id, body.role)).await?;

    tracing::info!(admin_id = admin.user_id, user_id = id, role = %body.role, "Role assigned by admin");
    Ok(HttpResponse::Ok().json(IdResponse::ok(id)))
}

pub async fn update_user(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<i64>,
    body: web::Json<UpdateUserRequest>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    with_timeout(state.request_timeout, state.users.update(id, body.into_inner().into())).await?;
    Ok(HttpResponse::Ok().json(IdResponse::ok(id)))
}

pub async fn delete_user(
    state: web::Data<AppState>,
    _admin: AdminUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    with_timeout(state.request_timeout, state.users.delete(path.into_inner())).await?;
    Ok(HttpResponse::NoContent().finish())
}
