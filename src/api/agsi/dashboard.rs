use actix_web::{get, HttpResponse, Responder};

const INDEX_HTML: &str = include_str!("dashboard.html");

/// The single page dashboard, it only talks to the json endpoints.
#[get("/")]
pub async fn index() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}
