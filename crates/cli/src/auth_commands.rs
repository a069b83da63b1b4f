use {
    anyhow::{Context as _, Result, bail},
    clap::Subcommand,
    serde::Serialize,
    synadmin_common::now_ms,
    synadmin_config::OAuthSettings,
    synadmin_oauth::{
        CallbackOutcome, CallbackServer, ClientMetadata, build_authorization_url, discover,
        normalize_server_name, register_client,
    },
    tracing::{debug, info},
};

use crate::context::{Context, describe_expiry};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Log in to a homeserver through its authorization server.
    Login {
        /// Server name (e.g. "example.org"). Defaults to `server.name` from the config.
        server: Option<String>,
        /// Print the authorization URL instead of opening a browser.
        #[arg(long, default_value_t = false)]
        no_browser: bool,
    },
    /// Show the stored credentials.
    Status,
    /// Forget the stored credentials.
    Logout,
    /// Evict abandoned authorization sessions.
    Gc,
}

pub async fn handle_auth(ctx: &Context, action: AuthAction) -> Result<()> {
    match action {
        AuthAction::Login { server, no_browser } => login(ctx, server, no_browser).await,
        AuthAction::Status => status(ctx),
        AuthAction::Logout => logout(ctx),
        AuthAction::Gc => gc(ctx),
    }
}

async fn login(ctx: &Context, server: Option<String>, no_browser: bool) -> Result<()> {
    let settings = &ctx.config.oauth;
    let Some(input) = server.or_else(|| ctx.config.server.name.clone()) else {
        bail!("no server given and `server.name` is not configured");
    };
    let server_name = normalize_server_name(&input, ctx.config.server.suffix.as_deref());
    if server_name.is_empty() {
        bail!("server name is empty");
    }

    let discovery = ctx
        .until_cancelled(discover(&ctx.http, &server_name))
        .await
        .with_context(|| format!("could not discover {server_name}"))?;
    debug!(homeserver = %discovery.homeserver_url, issuer = %discovery.auth.issuer, "server discovered");

    // Bind before registering so the redirect URI carries the real port.
    let callback = CallbackServer::bind(settings.callback_port).await?;
    let redirect_uri = OAuthSettings::redirect_uri_for(callback.local_addr()?.port());

    let metadata = ClientMetadata::native(&settings.client_name, &settings.client_uri, &redirect_uri);
    let registration = ctx
        .until_cancelled(register_client(
            &ctx.http,
            &discovery.auth.registration_endpoint,
            &metadata,
        ))
        .await?;

    let flow = ctx.authorization_flow();
    let session = flow.start_session(&discovery, &registration.client_id, &redirect_uri, None)?;
    let url = build_authorization_url(&discovery.auth.authorization_endpoint, &session)?;

    if no_browser || open::that(url.as_str()).is_err() {
        println!("Open this URL to log in:\n{url}");
    } else {
        println!("Opening browser to log in to {server_name}...");
    }
    println!("Waiting for the authorization redirect on {redirect_uri} ...");

    let params = callback.wait(settings.login_timeout(), &ctx.cancel).await?;
    let credentials = match params.into_outcome()? {
        CallbackOutcome::Code { state, code } => {
            flow.complete_session(&state, &code, &ctx.cancel).await?
        },
        CallbackOutcome::Denied {
            state,
            error,
            description,
        } => return Err(flow.fail_session(&state, error, description).into()),
    };

    ctx.credential_store()
        .save(&credentials)
        .context("failed to store credentials")?;
    info!(user_id = %credentials.user_id, "logged in");
    println!("Logged in to {} as {}", credentials.server_name, credentials.user_id);
    Ok(())
}

#[derive(Serialize)]
struct StatusView {
    server_name: String,
    homeserver_url: String,
    user_id: String,
    device_id: String,
    expires_at: Option<u64>,
    refreshable: bool,
}

fn status(ctx: &Context) -> Result<()> {
    let Some(credentials) = ctx.credential_store().load()? else {
        println!("Not logged in.");
        return Ok(());
    };
    let view = StatusView {
        server_name: credentials.server_name,
        homeserver_url: credentials.homeserver_url,
        user_id: credentials.user_id,
        device_id: credentials.device_id,
        expires_at: credentials.expires_at,
        refreshable: credentials.refresh_token.is_some(),
    };
    ctx.emit(&view, |v| {
        println!("{} on {} ({})", v.user_id, v.server_name, v.homeserver_url);
        println!("device:  {}", v.device_id);
        println!("token:   {}", describe_expiry(v.expires_at, now_ms() / 1000));
    })
}

fn logout(ctx: &Context) -> Result<()> {
    if ctx.credential_store().delete()? {
        ctx.cache.clear();
        println!("Logged out.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}

fn gc(ctx: &Context) -> Result<()> {
    let evicted = ctx
        .session_store()
        .collect_garbage(ctx.config.oauth.session_max_age())?;
    println!("Evicted {evicted} abandoned authorization session(s).");
    Ok(())
}
