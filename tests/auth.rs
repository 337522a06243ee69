use actix_web::{dev::Payload, test, FromRequest};
use startorigin::{
    auth::{create_jwt, decode_jwt, Auth, Claims, MaybeAuth, Role},
    error::ApiError,
    require_role,
};
use std::env;
use uuid::Uuid;

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

#[actix_web::test]
#[serial_test::serial]
async fn jwt_roundtrip_ok() {
    set_secret();
    let user = Uuid::new_v4();
    let token = create_jwt(user, vec![Role::User], 1).expect("token");
    // The Auth extractor is the public way to validate, so use it here.
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(auth.user_id(), user);
    assert!(auth.has_role(Role::User));
    assert!(!auth.has_role(Role::Admin));
}

#[actix_web::test]
#[serial_test::serial]
async fn extractor_rejects_invalid_token() {
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());

    let req = test::TestRequest::default().to_http_request();
    assert!(Auth::from_request(&req, &mut Payload::None).await.is_err());
}

#[actix_web::test]
#[serial_test::serial]
async fn expired_tokens_are_rejected() {
    set_secret();
    let token = create_jwt(Uuid::new_v4(), vec![Role::User], -2).expect("token");
    assert!(decode_jwt(&token).is_err());
}

#[actix_web::test]
#[serial_test::serial]
async fn maybe_auth_tolerates_missing_and_bad_tokens() {
    set_secret();
    let req = test::TestRequest::default().to_http_request();
    let anon = MaybeAuth::from_request(&req, &mut Payload::None).await.unwrap();
    assert!(anon.0.is_none());

    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer garbage"))
        .to_http_request();
    assert!(MaybeAuth::from_request(&req, &mut Payload::None).await.unwrap().0.is_none());

    let user = Uuid::new_v4();
    let token = create_jwt(user, vec![], 1).unwrap();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_http_request();
    let signed_in = MaybeAuth::from_request(&req, &mut Payload::None).await.unwrap();
    assert_eq!(signed_in.0.map(|c| c.sub), Some(user));
}

#[actix_web::test]
async fn require_role_macro_enforces_roles() {
    // Build Auth instances manually with different roles.
    let admin = Auth(Claims { sub: Uuid::new_v4(), exp: usize::MAX, roles: vec![Role::Admin] });
    let moderator = Auth(Claims { sub: Uuid::new_v4(), exp: usize::MAX, roles: vec![Role::Moderator] });
    let user = Auth(Claims { sub: Uuid::new_v4(), exp: usize::MAX, roles: vec![Role::User] });

    fn guarded(a: Auth) -> Result<(), ApiError> {
        require_role!(a, Role::Admin | Role::Moderator);
        Ok(())
    }
    fn admin_only(a: &Auth) -> Result<(), ApiError> {
        require_role!(a, Role::Admin);
        Ok(())
    }
    assert!(admin_only(&admin).is_ok());
    assert!(matches!(admin_only(&moderator), Err(ApiError::Forbidden)));
    assert!(guarded(admin).is_ok());
    assert!(guarded(moderator).is_ok());
    assert!(matches!(guarded(user), Err(ApiError::Forbidden)));
}
