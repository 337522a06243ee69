use crate::engagement::{AliasPurchase, Ledger, Purchase, ToggleOutcome, UpvoteState};
use crate::models::*;
use crate::routes::{AliasQuote, AliasRequest, Me, ProblemDetail, PublishedProblem, ReconcileReport, SignUp, UpvoteResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_problems,
        crate::routes::create_problem,
        crate::routes::get_problem,
        crate::routes::toggle_upvote,
        crate::routes::list_projects,
        crate::routes::create_project,
        crate::routes::get_me,
        crate::routes::create_me,
        crate::routes::update_me,
        crate::routes::my_points,
        crate::routes::search_users,
        crate::routes::list_items,
        crate::routes::purchase_item,
        crate::routes::quote_alias,
        crate::routes::purchase_alias,
        crate::routes::admin_delete_problem,
        crate::routes::admin_delete_alias,
        crate::routes::admin_create_item,
        crate::routes::admin_reconcile,
    ),
    components(schemas(
        Profile, ProfileStub, UpdateProfile, Problem, NewProblem, Project, NewProject,
        ProblemPage, ProjectPage, Sort, PointKind, PointTransaction, ItemKind, Rarity,
        CustomizationItem, NewCustomizationItem, UserCustomization, UserAlias, UserBadge,
        UpvoteState, ToggleOutcome, Ledger, Purchase, AliasPurchase,
        PublishedProblem, ProblemDetail, UpvoteResponse, Me, SignUp, AliasQuote, AliasRequest, ReconcileReport
    )),
    tags(
        (name = "problems", description = "Problem feed and upvotes"),
        (name = "shop", description = "Points, customizations and premium usernames"),
        (name = "admin", description = "Moderation, role-gated"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/problems",
            "/api/v1/problems/{id}/upvote",
            "/api/v1/shop/items/{id}/purchase",
            "/api/v1/admin/points/{user_id}/reconcile",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
