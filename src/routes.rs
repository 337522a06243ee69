use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::auth::{Auth, MaybeAuth, Role};
use crate::engagement::{
    alias_price, normalize_alias, publish_problem, AliasPurchase, Ledger, Purchase, Shop, ToggleOutcome, UpvoteState,
};
use crate::error::ApiError;
use crate::feed::PAGE_SIZE;
use crate::messaging::SEARCH_LIMIT;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::require_role;

const MAX_PAGE: usize = 50;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/problems")
                    .route(web::get().to(list_problems))
                    .route(web::post().to(create_problem)),
            )
            .service(web::resource("/problems/{id}").route(web::get().to(get_problem)))
            .service(web::resource("/problems/{id}/upvote").route(web::post().to(toggle_upvote)))
            .service(
                web::resource("/projects")
                    .route(web::get().to(list_projects))
                    .route(web::post().to(create_project)),
            )
            .service(
                web::resource("/me")
                    .route(web::get().to(get_me))
                    .route(web::post().to(create_me))
                    .route(web::patch().to(update_me)),
            )
            .service(web::resource("/me/points").route(web::get().to(my_points)))
            .service(web::resource("/users/search").route(web::get().to(search_users)))
            .service(web::resource("/shop/items").route(web::get().to(list_items)))
            .service(web::resource("/shop/items/{id}/purchase").route(web::post().to(purchase_item)))
            .service(web::resource("/aliases/price").route(web::get().to(quote_alias)))
            .service(web::resource("/aliases").route(web::post().to(purchase_alias)))
            // administrative endpoints, role-gated
            .service(web::resource("/admin/problems/{id}").route(web::delete().to(admin_delete_problem)))
            .service(web::resource("/admin/aliases/{id}").route(web::delete().to(admin_delete_alias)))
            .service(web::resource("/admin/shop/items").route(web::post().to(admin_create_item)))
            .service(web::resource("/admin/points/{user_id}/reconcile").route(web::post().to(admin_reconcile))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub shop: Arc<Shop>,
    pub rate_limiter: Option<RateLimiterFacade>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { shop: Arc::new(Shop::new(repo.clone())), repo, rate_limiter: None }
    }

    pub fn with_rate_limiter(mut self, rl: RateLimiterFacade) -> Self {
        self.rate_limiter = Some(rl);
        self
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FeedParams {
    /// Substring of title or description.
    pub search: Option<String>,
    /// Exact category; `all` or empty means any.
    pub category: Option<String>,
    pub sort: Option<Sort>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl FeedParams {
    fn split(self) -> (FeedQuery, usize, usize) {
        let limit = self.limit.unwrap_or(PAGE_SIZE).clamp(1, MAX_PAGE);
        let query = FeedQuery { search: self.search, category: self.category, sort: self.sort.unwrap_or_default() };
        (query, self.offset.unwrap_or(0), limit)
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/api/v1/problems",
    params(FeedParams),
    responses((status = 200, description = "One page of problems", body = ProblemPage))
)]
pub async fn list_problems(data: web::Data<AppState>, q: web::Query<FeedParams>) -> Result<HttpResponse, ApiError> {
    let (query, offset, limit) = q.into_inner().split();
    let page = data.repo.list_problems(&query, offset, limit).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublishedProblem {
    pub problem: Problem,
    pub transaction: PointTransaction,
}

#[utoipa::path(
    post,
    path = "/api/v1/problems",
    request_body = NewProblem,
    responses(
        (status = 201, description = "Problem published, author credited", body = PublishedProblem),
        (status = 400, description = "Missing title or description"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_problem(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewProblem>,
) -> Result<HttpResponse, ApiError> {
    let user = auth.user_id();
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_publish(&user.to_string()) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let new = payload.into_inner();
    non_empty("title", &new.title)?;
    non_empty("description", &new.description)?;
    let (problem, transaction) = publish_problem(&data.repo, user, new).await?;
    Ok(HttpResponse::Created().json(PublishedProblem { problem, transaction }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProblemDetail {
    pub problem: Problem,
    pub upvote: UpvoteState,
}

#[utoipa::path(
    get,
    path = "/api/v1/problems/{id}",
    params(("id" = Id, Path, description = "Problem id")),
    responses(
        (status = 200, description = "Problem with the caller's upvote state", body = ProblemDetail),
        (status = 404, description = "Problem not found")
    )
)]
pub async fn get_problem(auth: MaybeAuth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let problem = data.repo.get_problem(path.into_inner()).await?;
    let viewer = auth.0.map(|c| c.sub);
    let upvote = UpvoteState::load(data.repo.as_ref(), &problem, viewer).await?;
    Ok(HttpResponse::Ok().json(ProblemDetail { problem, upvote }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpvoteResponse {
    pub outcome: ToggleOutcome,
    pub upvote: UpvoteState,
}

#[utoipa::path(
    post,
    path = "/api/v1/problems/{id}/upvote",
    params(("id" = Id, Path, description = "Problem id")),
    responses(
        (status = 200, description = "Upvote toggled", body = UpvoteResponse),
        (status = 401, description = "Sign in required"),
        (status = 404, description = "Problem not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn toggle_upvote(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let user = auth.user_id();
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_upvote(&user.to_string()) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let problem = data.repo.get_problem(path.into_inner()).await?;
    let mut upvote = UpvoteState::load(data.repo.as_ref(), &problem, Some(user)).await?;
    let outcome = upvote.toggle(data.repo.as_ref()).await?;
    Ok(HttpResponse::Ok().json(UpvoteResponse { outcome, upvote }))
}

#[utoipa::path(
    get,
    path = "/api/v1/projects",
    params(FeedParams),
    responses((status = 200, description = "One page of projects", body = ProjectPage))
)]
pub async fn list_projects(data: web::Data<AppState>, q: web::Query<FeedParams>) -> Result<HttpResponse, ApiError> {
    let (query, offset, limit) = q.into_inner().split();
    let page = data.repo.list_projects(&query, offset, limit).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    post,
    path = "/api/v1/projects",
    request_body = NewProject,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 400, description = "Missing title or description")
    )
)]
pub async fn create_project(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewProject>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    non_empty("title", &new.title)?;
    non_empty("description", &new.description)?;
    let project = data.repo.create_project(auth.user_id(), new).await?;
    info!(project = %project.id, owner = %project.owner_id, "project created");
    Ok(HttpResponse::Created().json(project))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Me {
    pub profile: Profile,
    pub badges: Vec<UserBadge>,
    pub aliases: Vec<UserAlias>,
    pub customizations: Vec<UserCustomization>,
}

#[utoipa::path(
    get,
    path = "/api/v1/me",
    responses(
        (status = 200, description = "Caller's profile", body = Me),
        (status = 404, description = "No profile yet")
    )
)]
pub async fn get_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = auth.user_id();
    let profile = data.repo.get_profile(user).await?;
    let badges = data.repo.list_badges(user).await?;
    let aliases = data.repo.list_aliases(user).await?;
    let customizations = data.repo.list_owned(user).await?;
    Ok(HttpResponse::Ok().json(Me { profile, badges, aliases, customizations }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignUp {
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/me",
    request_body = SignUp,
    responses(
        (status = 201, description = "Profile created for the token subject", body = Profile),
        (status = 400, description = "Invalid username"),
        (status = 409, description = "Username taken or profile exists")
    )
)]
pub async fn create_me(auth: Auth, data: web::Data<AppState>, payload: web::Json<SignUp>) -> Result<HttpResponse, ApiError> {
    let body = payload.into_inner();
    // usernames follow the alias rules so the two share one namespace
    let username = normalize_alias(&body.username)?;
    if data.repo.find_alias(&username).await?.is_some() {
        return Err(ApiError::Conflict);
    }
    let profile = data
        .repo
        .create_profile(NewProfile {
            id: auth.user_id(),
            username,
            display_name: body.display_name,
            avatar_url: body.avatar_url,
        })
        .await?;
    info!(user = %profile.id, username = %profile.username, "profile created");
    Ok(HttpResponse::Created().json(profile))
}

#[utoipa::path(
    patch,
    path = "/api/v1/me",
    request_body = UpdateProfile,
    responses((status = 200, description = "Profile updated", body = Profile))
)]
pub async fn update_me(auth: Auth, data: web::Data<AppState>, payload: web::Json<UpdateProfile>) -> Result<HttpResponse, ApiError> {
    let profile = data.repo.update_profile(auth.user_id(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[utoipa::path(
    get,
    path = "/api/v1/me/points",
    responses((status = 200, description = "Balance and ledger, newest first", body = Ledger))
)]
pub async fn my_points(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let ledger = data.shop.points().ledger(auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(ledger))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchParams {
    pub q: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/users/search",
    params(SearchParams),
    responses((status = 200, description = "Up to 10 matching users, caller excluded", body = [ProfileStub]))
)]
pub async fn search_users(auth: Auth, data: web::Data<AppState>, q: web::Query<SearchParams>) -> Result<HttpResponse, ApiError> {
    let query = q.into_inner().q.unwrap_or_default();
    if query.trim().is_empty() {
        return Ok(HttpResponse::Ok().json(Vec::<ProfileStub>::new()));
    }
    let rows = data.repo.search_profiles(query.trim(), auth.user_id(), SEARCH_LIMIT).await?;
    let stubs: Vec<ProfileStub> = rows.iter().map(ProfileStub::from).collect();
    Ok(HttpResponse::Ok().json(stubs))
}

#[utoipa::path(
    get,
    path = "/api/v1/shop/items",
    responses((status = 200, description = "Catalogue, cheapest first", body = [CustomizationItem]))
)]
pub async fn list_items(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_items().await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/shop/items/{id}/purchase",
    params(("id" = Id, Path, description = "Item id")),
    responses(
        (status = 201, description = "Item purchased", body = Purchase),
        (status = 402, description = "Not enough points; body carries shortfall and problems_needed"),
        (status = 409, description = "Already owned"),
        (status = 429, description = "Another purchase is in flight or rate limited")
    )
)]
pub async fn purchase_item(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let user = auth.user_id();
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_purchase(&user.to_string()) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let purchase = data.shop.purchase(user, path.into_inner()).await?;
    Ok(HttpResponse::Created().json(purchase))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AliasParams {
    pub alias: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AliasQuote {
    pub alias: String,
    pub price: i64,
    pub available: bool,
}

#[utoipa::path(
    get,
    path = "/api/v1/aliases/price",
    params(AliasParams),
    responses(
        (status = 200, description = "Price and availability", body = AliasQuote),
        (status = 400, description = "Invalid alias")
    )
)]
pub async fn quote_alias(data: web::Data<AppState>, q: web::Query<AliasParams>) -> Result<HttpResponse, ApiError> {
    let alias = normalize_alias(&q.alias)?;
    let available = data.repo.find_alias(&alias).await?.is_none()
        && data.repo.find_profile_by_username(&alias).await?.is_none();
    Ok(HttpResponse::Ok().json(AliasQuote { price: alias_price(&alias), alias, available }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AliasRequest {
    pub alias: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/aliases",
    request_body = AliasRequest,
    responses(
        (status = 201, description = "Alias purchased", body = AliasPurchase),
        (status = 400, description = "Invalid alias"),
        (status = 402, description = "Not enough points"),
        (status = 409, description = "Alias taken")
    )
)]
pub async fn purchase_alias(auth: Auth, data: web::Data<AppState>, payload: web::Json<AliasRequest>) -> Result<HttpResponse, ApiError> {
    let user = auth.user_id();
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_purchase(&user.to_string()) {
            return Err(ApiError::TooManyRequests);
        }
    }
    let purchase = data.shop.purchase_alias(user, &payload.alias).await?;
    Ok(HttpResponse::Created().json(purchase))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/problems/{id}",
    params(("id" = Id, Path, description = "Problem id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Moderators and admins only"),
        (status = 404, description = "Not found")
    )
)]
pub async fn admin_delete_problem(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Moderator | Role::Admin);
    let id = path.into_inner();
    data.repo.delete_problem(id).await?;
    info!(problem = %id, by = %auth.user_id(), "problem deleted by moderator");
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/aliases/{id}",
    params(("id" = Id, Path, description = "Alias id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Moderators and admins only"),
        (status = 404, description = "Not found")
    )
)]
pub async fn admin_delete_alias(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Moderator | Role::Admin);
    let alias = data.repo.get_alias(path.into_inner()).await?;
    data.repo.delete_alias(alias.id).await?;
    info!(alias = %alias.alias, owner = %alias.user_id, by = %auth.user_id(), "alias revoked");
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/shop/items",
    request_body = NewCustomizationItem,
    responses(
        (status = 201, description = "Item created", body = CustomizationItem),
        (status = 403, description = "Admins only"),
        (status = 409, description = "Name taken")
    )
)]
pub async fn admin_create_item(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewCustomizationItem>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let new = payload.into_inner();
    non_empty("name", &new.name)?;
    if new.price < 0 {
        return Err(ApiError::BadRequest("price must not be negative".into()));
    }
    let item = data.repo.create_item(new).await?;
    Ok(HttpResponse::Created().json(item))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReconcileReport {
    pub user_id: Id,
    /// Stored balance minus ledger sum before correction.
    pub drift: i64,
    pub balance: i64,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/points/{user_id}/reconcile",
    params(("user_id" = Id, Path, description = "Profile id")),
    responses(
        (status = 200, description = "Balance recomputed from the ledger", body = ReconcileReport),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Profile not found")
    )
)]
pub async fn admin_reconcile(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let user_id = path.into_inner();
    let drift = data.shop.points().reconcile(user_id).await?;
    let profile = data.repo.get_profile(user_id).await?;
    Ok(HttpResponse::Ok().json(ReconcileReport { user_id, drift, balance: profile.points }))
}
