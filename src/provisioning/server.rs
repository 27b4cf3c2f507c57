//! Routes of the local provisioning server.

use super::Submission;
use crate::{
    account_client::AccountService,
    models::{AccountBinding, WifiCredentials},
};
use actix_files::NamedFile;
use actix_web::{HttpRequest, HttpResponse, Responder, guard, web};
use log::{debug, error, info, warn};
use serde_valid::Validate;
use std::path::{Component, Path, PathBuf};

/// Directory a session serves its static page from.
#[derive(Clone, Debug)]
pub struct PageRoot(PathBuf);

impl PageRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(root.into())
    }

    /// File to serve for `request_path`, falling back to `index.html`.
    ///
    /// Paths leaving the root are never resolved.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));

        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }

        let candidate = self.0.join(relative);
        if candidate.is_file() {
            return Some(candidate);
        }

        let index = self.0.join("index.html");
        index.is_file().then_some(index)
    }
}

/// Router session: POST on any path, GET serves the router page.
pub fn router_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/{tail:.*}")
            .route(web::post().to(submit_router_credentials))
            .route(web::get().to(serve_page)),
    );
}

/// Registration session: POST `/register`, GET serves the registration page.
pub fn registration_routes<A>(cfg: &mut web::ServiceConfig)
where
    A: AccountService + 'static,
{
    cfg.service(
        web::resource("/register")
            .guard(guard::Post())
            .to(register_device::<A>),
    )
    .service(web::resource("/{tail:.*}").route(web::get().to(serve_page)));
}

pub async fn serve_page(
    req: HttpRequest,
    root: web::Data<PageRoot>,
) -> actix_web::Result<NamedFile> {
    debug!("serve_page() called: {}", req.path());

    let Some(path) = root.resolve(req.path()) else {
        return Err(actix_web::error::ErrorNotFound("page not found"));
    };

    Ok(NamedFile::open_async(path).await?)
}

pub async fn submit_router_credentials(
    body: web::Json<WifiCredentials>,
    submission: web::Data<Submission<WifiCredentials>>,
) -> impl Responder {
    debug!("submit_router_credentials() called: {body:?}");

    let credentials = body.into_inner();

    if let Err(e) = credentials.validate() {
        warn!("rejected router credentials: {e}");
        return HttpResponse::BadRequest().body("Invalid credentials");
    }

    if !submission.claim() {
        info!("ignoring router credentials, already received");
        return HttpResponse::Conflict().body("Credentials already received");
    }

    submission.release_after_grace(credentials);
    HttpResponse::Ok().body("Credentials received")
}

pub async fn register_device<A>(
    body: web::Json<AccountBinding>,
    account: web::Data<A>,
    submission: web::Data<Submission<AccountBinding>>,
) -> impl Responder
where
    A: AccountService + 'static,
{
    debug!("register_device() called: {body:?}");

    if submission.is_claimed() {
        info!("ignoring registration, device already registered");
        return HttpResponse::Conflict().body("Device already registered");
    }

    let binding = body.into_inner();

    match account.verify(&binding).await {
        Ok(true) => {}
        Ok(false) => return HttpResponse::BadRequest().body("Invalid account"),
        Err(e) => {
            error!("failed to verify account: {e:#}");
            return HttpResponse::BadRequest().body("Invalid account");
        }
    }

    if !submission.claim() {
        info!("ignoring registration, device already registered");
        return HttpResponse::Conflict().body("Device already registered");
    }

    submission.release_after_grace(binding);
    HttpResponse::Ok().body("Device registered")
}
