//! Short-lived local sessions collecting one piece of configuration.
//!
//! A session runs the provisioning server until the first valid submission
//! was accepted, hands the captured value to the waiting caller and stops
//! listening. Sessions have no timeout.

pub mod server;

use crate::{
    account_client::AccountService,
    config::ProvisioningConfig,
    connectivity::ConnectivityManager,
    models::{AccountBinding, WifiCredentials},
    signal::Slot,
};
use actix_server::{Server, ServerHandle};
use actix_web::{App, HttpServer, web::Data};
use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use server::PageRoot;
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use trait_variant::make;

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait Provisioner: Send + Sync {
    /// Collect router credentials over the device's access point.
    async fn run_router_session(&self) -> Result<WifiCredentials>;
    /// Collect and verify an account binding over the station link.
    async fn run_registration_session(&self) -> Result<AccountBinding>;
}

/// LAN name registration collaborator.
pub trait NameService: Send + Sync {
    fn register_hostname(&self, hostname: &str) -> Result<()>;
}

/// At-most-once acceptance of a session's submission.
pub struct Submission<T> {
    accepted: AtomicBool,
    slot: Arc<Slot<T>>,
    grace: Duration,
}

impl<T: Send + 'static> Submission<T> {
    pub fn new(grace: Duration) -> Self {
        Self {
            accepted: AtomicBool::new(false),
            slot: Arc::new(Slot::new()),
            grace,
        }
    }

    /// Claim the session for one submission. Only the first call succeeds.
    pub fn claim(&self) -> bool {
        self.accepted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_claimed(&self) -> bool {
        self.accepted.load(Ordering::Acquire)
    }

    /// Hand `value` to the waiting session once the response had time to
    /// reach the client.
    pub fn release_after_grace(&self, value: T) {
        let slot = self.slot.clone();
        let grace = self.grace;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            slot.offer(value);
        });
    }

    pub async fn wait(&self) -> T {
        self.slot.take().await
    }
}

/// Provisioning server accepting submissions.
pub struct RunningSession<T> {
    addr: SocketAddr,
    handle: ServerHandle,
    task: JoinHandle<std::io::Result<()>>,
    submission: Arc<Submission<T>>,
}

impl<T: Send + 'static> RunningSession<T> {
    fn launch(server: Server, addr: SocketAddr, submission: Arc<Submission<T>>) -> Self {
        info!("provisioning server listening on {addr}");

        Self {
            addr,
            handle: server.handle(),
            task: tokio::spawn(server),
            submission,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Block until a submission was released, then stop the server.
    pub async fn wait(mut self) -> Result<T> {
        let value = tokio::select! {
            value = self.submission.wait() => value,
            result = &mut self.task => {
                return Err(match result {
                    Ok(Ok(())) => anyhow!("provisioning server stopped without submission"),
                    Ok(Err(e)) => anyhow!(e).context("provisioning server failed"),
                    Err(e) => anyhow!(e).context("provisioning server task panicked"),
                });
            }
        };

        self.handle.stop(true).await;

        match self.task.await {
            Ok(Ok(())) => debug!("provisioning server stopped"),
            Ok(Err(e)) => error!("provisioning server stopped with error: {e}"),
            Err(e) => error!("provisioning server task panicked: {e}"),
        }

        Ok(value)
    }
}

/// Router and registration sessions on top of the device collaborators.
pub struct ProvisioningSessions<A> {
    config: ProvisioningConfig,
    connectivity: ConnectivityManager,
    names: Arc<dyn NameService>,
    account: Arc<A>,
}

impl<A> ProvisioningSessions<A>
where
    A: AccountService + 'static,
{
    pub fn new(
        config: ProvisioningConfig,
        connectivity: ConnectivityManager,
        names: Arc<dyn NameService>,
        account: Arc<A>,
    ) -> Self {
        Self {
            config,
            connectivity,
            names,
            account,
        }
    }

    fn register_hostname(&self) {
        if let Err(e) = self.names.register_hostname(&self.config.hostname) {
            error!("failed to register hostname: {e:#}");
        }
    }

    /// Switch to access-point mode and start accepting router credentials.
    pub fn start_router_session(&self) -> Result<RunningSession<WifiCredentials>> {
        self.connectivity
            .connect_as_access_point(&self.config.ap_name, &self.config.ap_password)?;
        self.register_hostname();

        let submission = Arc::new(Submission::new(self.config.release_grace));
        let submission_data = Data::from(submission.clone());
        let pages = Data::new(PageRoot::new(self.config.router_root()));

        let server = HttpServer::new(move || {
            App::new()
                .app_data(submission_data.clone())
                .app_data(pages.clone())
                .configure(server::router_routes)
        })
        .workers(1)
        .shutdown_timeout(1)
        .disable_signals()
        .bind((self.config.bind_address, self.config.port))
        .context("failed to bind provisioning server")?;

        let addr = server
            .addrs()
            .first()
            .copied()
            .context("failed to get provisioning server address")?;

        Ok(RunningSession::launch(server.run(), addr, submission))
    }

    /// Start accepting account bindings over the existing station link.
    pub fn start_registration_session(&self) -> Result<RunningSession<AccountBinding>> {
        if !self.connectivity.is_connected() {
            warn!("starting registration session without station link");
        }
        self.register_hostname();

        let submission = Arc::new(Submission::new(self.config.release_grace));
        let submission_data = Data::from(submission.clone());
        let pages = Data::new(PageRoot::new(self.config.registration_root()));
        let account = Data::from(self.account.clone());

        let server = HttpServer::new(move || {
            App::new()
                .app_data(submission_data.clone())
                .app_data(pages.clone())
                .app_data(account.clone())
                .configure(server::registration_routes::<A>)
        })
        .workers(1)
        .shutdown_timeout(1)
        .disable_signals()
        .bind((self.config.bind_address, self.config.port))
        .context("failed to bind provisioning server")?;

        let addr = server
            .addrs()
            .first()
            .copied()
            .context("failed to get provisioning server address")?;

        Ok(RunningSession::launch(server.run(), addr, submission))
    }
}

impl<A> Provisioner for ProvisioningSessions<A>
where
    A: AccountService + 'static,
{
    async fn run_router_session(&self) -> Result<WifiCredentials> {
        info!("router session started");
        let credentials = self.start_router_session()?.wait().await?;
        info!("router credentials received for {}", credentials.ssid);
        Ok(credentials)
    }

    async fn run_registration_session(&self) -> Result<AccountBinding> {
        info!("registration session started");
        let binding = self.start_registration_session()?.wait().await?;
        info!("device registered to {}", binding.account_email);
        Ok(binding)
    }
}
