//! Index page served over HTTP
//!
//! Browsers need a page to load before they can open the gateway socket.
//! The page is a template: every `{{port}}` is replaced with the gateway's
//! port once, when the server is built, and the rendered text is served
//! from memory at `GET /`. An optional directory is exposed under
//! `/static/` for scripts and stylesheets the page refers to.

use std::path::PathBuf;
use std::sync::Arc;

use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::{Filter, Reply};

/// Page served when no template file is configured
pub const DEFAULT_INDEX: &str = include_str!("../static/index.html");

/// Placeholder replaced with the gateway port
pub const PORT_PLACEHOLDER: &str = "{{port}}";

/// Substitute the gateway port into a page template
///
/// ```rust
/// use wsrelay_server::page::render_index;
///
/// let page = render_index("<script>connect({{port}})</script>", 8001);
/// assert_eq!(page, "<script>connect(8001)</script>");
/// ```
pub fn render_index(template: &str, port: u16) -> String {
    template.replace(PORT_PLACEHOLDER, &port.to_string())
}

/// HTTP routes: the rendered page at `/`, plus `/static/` when a directory is given
pub fn routes(page: String, static_dir: Option<PathBuf>) -> BoxedFilter<(Response,)> {
    let page = Arc::new(page);
    let index = warp::path::end()
        .and(warp::get())
        .map(move || warp::reply::html(page.as_ref().clone()).into_response());

    match static_dir {
        Some(dir) => {
            let assets = warp::path("static")
                .and(warp::fs::dir(dir))
                .map(|file: warp::fs::File| file.into_response());
            index.or(assets).unify().boxed()
        }
        None => index.boxed(),
    }
}
