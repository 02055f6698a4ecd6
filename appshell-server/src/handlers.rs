//! Built-in page handlers and static file serving

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    Form,
    body::Body,
    extract::{ConnectInfo, Query, Request, State, rejection::FormRejection},
    http::{Extensions, HeaderValue, Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use tera::Context;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use appshell_core::is_safe;
use appshell_core::pages::WEB_HOME;
use appshell_core::safe::args_safe;
use appshell_core::static_files::download_name;

use crate::error::{ShellError, return_error};
use crate::state::AppState;

const HOME_TEMPLATE: &str = "index.html";
const FALLBACK_HOME: &str = "<body>appshell</body>";

/// Home page: `index.html` from the template layers, or a placeholder
pub async fn web_home(State(state): State<AppState>) -> Result<Html<String>, ShellError> {
    if !state.has_template(HOME_TEMPLATE) {
        return Ok(Html(FALLBACK_HOME.to_string()));
    }
    state.render(HOME_TEMPLATE, WEB_HOME, Context::new()).map(Html)
}

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Debug, Deserialize)]
pub struct ShutdownForm {
    #[serde(rename = "UUID")]
    uuid: Option<String>,
}

/// Remote shutdown: a POST carrying the current shutdown token stops
/// the real-time channel, which in turn ends the server
pub async fn shutdown_server(
    State(state): State<AppState>,
    extensions: Extensions,
    method: Method,
    form: Result<Form<ShutdownForm>, FormRejection>,
) -> Response {
    let remote = remote_addr(&extensions);
    let token = form.ok().and_then(|Form(f)| f.uuid);

    if method != Method::POST || token.as_deref() != Some(state.shutdown_token.as_ref()) {
        tracing::error!(
            "Received shutdown request from {}. Missing proper UUID. Verify proper usage.",
            remote
        );
        return (StatusCode::FORBIDDEN, "ACCESS DENIED").into_response();
    }

    if state.hub.stop() {
        tracing::info!("Received shutdown request from {}. Stopping services...", remote);
        (StatusCode::OK, "Services shutting down...\n").into_response()
    } else {
        tracing::error!("Received shutdown request from {}. Services not running!", remote);
        (StatusCode::INTERNAL_SERVER_ERROR, "Services not available").into_response()
    }
}

fn remote_addr(extensions: &Extensions) -> String {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Check every query argument with the safe-string rule; logs the
/// first offending argument
pub fn request_args_safe(args: &HashMap<String, String>, extra: &[&str]) -> bool {
    match args_safe(args.iter().map(|(k, v)| (k.as_str(), v.as_str())), extra) {
        Ok(()) => true,
        Err(name) => {
            tracing::error!("Argument '{}' failed safe check!", name);
            false
        }
    }
}

/// Fallback handler serving discovered static files by exact route,
/// matched against the percent-decoded request path. `?download` with a
/// safe value forces an attachment.
pub async fn static_file(
    State(state): State<AppState>,
    Query(args): Query<HashMap<String, String>>,
    request: Request,
) -> Response {
    if !matches!(*request.method(), Method::GET | Method::HEAD) {
        return return_error(StatusCode::NOT_FOUND);
    }
    let Ok(route) = percent_decode_str(request.uri().path()).decode_utf8() else {
        return return_error(StatusCode::NOT_FOUND);
    };
    let route = route.into_owned();
    let Some(file) = state.static_files.get(&route) else {
        return return_error(StatusCode::NOT_FOUND);
    };

    let disposition = if is_safe(args.get("download").map(String::as_str), &[]) {
        "attachment"
    } else {
        "inline"
    };
    let disposition = HeaderValue::from_str(&format!(
        "{}; filename=\"{}\"",
        disposition,
        download_name(&route).replace('"', "")
    ));

    let path = file.path.clone();
    let Ok(response) = ServeFile::new(&path).oneshot(request).await;
    let mut response = response.map(Body::new);
    if response.status().is_success() {
        match disposition {
            Ok(value) => {
                response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
            }
            Err(_) => tracing::debug!("No Content-Disposition for {}", path.display()),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_args_safe() {
        let mut args = HashMap::new();
        args.insert("page".to_string(), "3".to_string());
        args.insert("sort".to_string(), "name_asc".to_string());
        assert!(!request_args_safe(&args, &[]));
        assert!(request_args_safe(&args, &["_"]));

        args.insert("q".to_string(), "<script>".to_string());
        assert!(!request_args_safe(&args, &["_"]));
    }

    #[test]
    fn test_remote_addr_without_connect_info() {
        assert_eq!(remote_addr(&Extensions::new()), "-");
    }
}
