use mongodb::bson::doc;
use rocket::{
    http::{Cookie, CookieJar},
    serde::json::Json,
    State,
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    admin::{Admin, AdminCredentials},
    auth::{AuthToken, AUTH_TOKEN_COOKIE},
    mongodb::Coll,
};

/// Log an admin in, setting the auth token cookie. Voter tokens are minted
/// by the external identity provider against the same signing secret and
/// need no endpoint here.
#[post("/auth/admin", format = "json", data = "<credentials>")]
pub async fn admin_login(
    credentials: Json<AdminCredentials>,
    admins: Coll<Admin>,
    cookies: &CookieJar<'_>,
    config: &State<Config>,
) -> Result<()> {
    let credentials = credentials.into_inner();
    let admin = admins
        .find_one(doc! { "username": credentials.username.as_str() }, None)
        .await?
        .filter(|admin| admin.verify_password(&credentials.password))
        // One message for both failure modes; do not reveal which usernames
        // exist.
        .ok_or_else(|| Error::Permission("Invalid username or password".to_string()))?;

    cookies.add(AuthToken::new(&admin).into_cookie(config));
    Ok(())
}

/// Log out whoever is logged in.
#[delete("/auth")]
pub fn logout(cookies: &CookieJar<'_>) {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
}
