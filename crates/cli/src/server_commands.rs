use {
    anyhow::Result,
    clap::Subcommand,
    secrecy::ExposeSecret,
    serde::Serialize,
    synadmin_synapse::{Adminbot, EssVersion, FeatureStatus, ServerVersion, keys},
};

use crate::context::{Context, Session};

#[derive(Subcommand)]
pub enum ServerAction {
    /// Synapse version.
    Version,
    /// ESS version and edition, if this is an ESS deployment.
    Edition,
    /// Which optional features this deployment offers.
    Features,
    /// Credentials of the ESS admin bot.
    Adminbot {
        /// Also print the bot's access token and passphrase.
        #[arg(long, default_value_t = false)]
        show_secrets: bool,
    },
}

pub async fn handle_server(ctx: &Context, action: ServerAction) -> Result<()> {
    let session = ctx.session().await?;
    match action {
        ServerAction::Version => version(ctx, &session).await,
        ServerAction::Edition => edition(ctx, &session).await,
        ServerAction::Features => features(ctx, &session).await,
        ServerAction::Adminbot { show_secrets } => adminbot(ctx, &session, show_secrets).await,
    }
}

async fn version(ctx: &Context, session: &Session) -> Result<()> {
    let client = &session.client;
    let version: ServerVersion = ctx
        .cache
        .get_or_fetch(keys::server_version(&client.root_key()), || {
            client.server_version(&ctx.cancel)
        })
        .await?;
    ctx.emit(&version, |v| println!("{}", v.server_version))
}

async fn ess_version(ctx: &Context, session: &Session) -> Result<EssVersion> {
    let client = &session.client;
    Ok(ctx
        .cache
        .get_or_fetch(keys::ess_version(&client.root_key()), || {
            client.ess_version(&ctx.cancel)
        })
        .await?)
}

async fn edition(ctx: &Context, session: &Session) -> Result<()> {
    let ess = ess_version(ctx, session).await?;
    ctx.emit(&ess, |e| match (&e.version, e.edition) {
        (None, None) => println!("not an ESS deployment"),
        (version, edition) => {
            let edition = edition.map_or("unknown edition", |e| e.as_str());
            println!("ESS {} ({edition})", version.as_deref().unwrap_or("unknown version"));
        },
    })
}

async fn features(ctx: &Context, session: &Session) -> Result<()> {
    let ess = ess_version(ctx, session).await?;
    let issuer = &session.credentials.issuer;
    let auth_version: Option<String> = ctx
        .cache
        .get_or_fetch(keys::auth_server_version(issuer), || {
            session.client.auth_server_version(issuer, &ctx.cancel)
        })
        .await?;
    let status = FeatureStatus::compute(ess.edition, auth_version.as_deref());
    ctx.emit(&status, |s| {
        println!("moderation:      {}", yes_no(s.moderation));
        println!("auditing:        {}", yes_no(s.auditing));
        println!("personal tokens: {}", yes_no(s.personal_tokens));
    })
}

fn yes_no(on: bool) -> &'static str {
    if on { "available" } else { "unavailable" }
}

#[derive(Serialize)]
struct AdminbotView<'a> {
    mxid: &'a str,
    device_id: &'a str,
    ui_address: Option<&'a str>,
    access_token: Option<&'a str>,
    secure_passphrase: Option<&'a str>,
}

impl<'a> AdminbotView<'a> {
    fn new(bot: &'a Adminbot, show_secrets: bool) -> Self {
        Self {
            mxid: &bot.mxid,
            device_id: &bot.device_id,
            ui_address: bot.ui_address.as_deref(),
            access_token: show_secrets.then(|| bot.access_token.expose_secret().as_str()),
            secure_passphrase: bot
                .secure_passphrase
                .as_ref()
                .filter(|_| show_secrets)
                .map(|p| p.expose_secret().as_str()),
        }
    }
}

async fn adminbot(ctx: &Context, session: &Session, show_secrets: bool) -> Result<()> {
    let client = &session.client;
    let bot: Option<Adminbot> = ctx
        .cache
        .get_or_fetch(keys::adminbot(&client.root_key()), || {
            client.adminbot(&ctx.cancel)
        })
        .await?;
    let Some(bot) = bot else {
        println!("this deployment has no admin bot");
        return Ok(());
    };
    let view = AdminbotView::new(&bot, show_secrets);
    ctx.emit(&view, |v| {
        println!("mxid:       {}", v.mxid);
        println!("device:     {}", v.device_id);
        if let Some(ui) = v.ui_address {
            println!("ui address: {ui}");
        }
        if let Some(token) = v.access_token {
            println!("token:      {token}");
        }
        if let Some(passphrase) = v.secure_passphrase {
            println!("passphrase: {passphrase}");
        }
    })
}
