//! Login, logout and the login-required guard
//!
//! A successful login stores a signed session token in an HttpOnly
//! cookie. Each guarded request verifies the token and asks the user
//! controller for the identity again, so a user removed from the
//! backend loses access on the next request.

use std::time::Duration;

use axum::{
    Form,
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::{Map, Value};
use tera::Context;

use appshell_core::{Identity, is_safe_url};

use crate::error::ShellError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "appshell_session";

const LOGIN_TEMPLATE: &str = "login.html";

/// Login form used when no template layer provides `login.html`
const FALLBACK_LOGIN: &str = r#"<!DOCTYPE html>
<html><head><title>Login</title></head>
<body>
<form method="post">
<input type="hidden" name="next" value="{{ next }}">
{% if error %}<p class="error">{{ error }}</p>{% endif %}
<input name="username" placeholder="Username" autofocus>
<input name="password" type="password" placeholder="Password">
<button type="submit">Login</button>
</form>
</body></html>"#;

#[derive(Debug, Deserialize)]
pub struct NextQuery {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
    #[serde(default)]
    next: Option<String>,
}

/// Identity behind the request's session cookie, if still valid
pub async fn current_identity(state: &AppState, jar: &CookieJar) -> Option<Identity> {
    let token = jar.get(SESSION_COOKIE)?.value();
    let claims = match state.sessions.verify(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!("Rejecting session token: {}", e);
            return None;
        }
    };
    let identity = state.users.get_user(&claims.sub).await?;
    (identity.is_authenticated() && identity.is_active()).then_some(identity)
}

fn render_login(state: &AppState, next: Option<&str>, error: Option<&str>) -> Result<String, ShellError> {
    let mut context = Context::new();
    context.insert("next", next.unwrap_or(""));
    context.insert("error", &error);

    if state.has_template(LOGIN_TEMPLATE) {
        return state.render_with_page(LOGIN_TEMPLATE, Value::Object(Map::new()), context);
    }
    context.insert("site", state.site.as_ref());
    tera::Tera::one_off(FALLBACK_LOGIN, &context, true).map_err(|e| ShellError::Template(e.into()))
}

/// `GET <login_page>`
pub async fn login_page(
    State(state): State<AppState>,
    Query(query): Query<NextQuery>,
) -> Result<Html<String>, ShellError> {
    render_login(&state, query.next.as_deref(), None).map(Html)
}

/// `POST <login_page>`
pub async fn login_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, ShellError> {
    let identity = match state.users.authenticate(&form.username, &form.password).await {
        Some(identity) if identity.is_active() => identity,
        found => {
            let reason = if found.is_some() {
                "Account is disabled"
            } else {
                "Invalid username or password"
            };
            tracing::warn!("{}: login failed for '{}': {}", state.info_str(), form.username, reason);
            let body = render_login(&state, form.next.as_deref(), Some(reason))?;
            return Ok((StatusCode::UNAUTHORIZED, Html(body)).into_response());
        }
    };

    let token = state.sessions.issue(&identity)?;
    let mut cookie = Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    if let Ok(max_age) = Duration::from_secs(state.sessions.ttl()).try_into() {
        cookie = cookie.max_age(max_age);
    }
    let cookie = cookie.build();

    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let target = match form.next.as_deref().filter(|n| !n.is_empty()) {
        Some(next) if is_safe_url(&format!("http://{host}/"), next) => next.to_string(),
        Some(next) => {
            tracing::warn!("Refusing login redirect to {}", next);
            "/".to_string()
        }
        None => "/".to_string(),
    };

    tracing::info!("{}: {} logged in", state.info_str(), identity);
    Ok((jar.add(cookie), Redirect::to(&target)).into_response())
}

/// `GET|POST <logout_page>`
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to(&state.config.auth.login_page))
}

/// Middleware redirecting anonymous requests to the login page. The
/// identity is made available to the handler as an extension.
pub async fn require_login(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(identity) = current_identity(&state, &jar).await {
        request.extensions_mut().insert(identity);
        return next.run(request).await;
    }

    let wanted = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let encoded: String = url::form_urlencoded::byte_serialize(wanted.as_bytes()).collect();
    Redirect::to(&format!("{}?next={}", state.config.auth.login_page, encoded)).into_response()
}
