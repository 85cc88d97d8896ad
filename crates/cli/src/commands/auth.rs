//! Sign-in, registration and sign-out commands.

use chrono::Utc;
use tracing::{info, warn};
use url::Url;

use pricepulse_client::session::{CallbackParams, Credentials, OtpError, RegistrationProfile};
use pricepulse_client::{ClientError, PricePulse};

use super::prompt;

/// Sign in with email and password.
pub async fn login(client: &PricePulse, email: &str, password: Option<String>) -> Result<(), ClientError> {
    let password = match password {
        Some(p) => p,
        None => prompt("Password").await?,
    };
    let session = client
        .session()
        .login(Credentials::password(email, password)?)
        .await?;
    info!("Signed in as {}", session.identity.display_name());
    Ok(())
}

/// Sign in through the federated identity provider.
pub async fn login_federated(client: &PricePulse, redirect_url: Option<String>) -> Result<(), ClientError> {
    let provider = client.federated().ok_or_else(|| {
        ClientError::BadRequest("federated login requires PRICEPULSE_AUTH_MODE=federated".to_string())
    })?;

    let redirect_url = match redirect_url {
        Some(url) => url,
        None => {
            info!("Open this URL in a browser and sign in:");
            info!("{}", provider.authorization_url());
            prompt("Paste the URL you were redirected to").await?
        }
    };
    let redirect_url = Url::parse(&redirect_url)
        .map_err(|e| ClientError::BadRequest(format!("invalid redirect URL: {e}")))?;

    let session = client
        .session()
        .login(Credentials::Federated(CallbackParams::from_redirect_url(&redirect_url)))
        .await?;
    info!("Signed in as {}", session.identity.display_name());
    Ok(())
}

/// Create an account, verifying the email with a one-time code.
pub async fn register(client: &PricePulse, email: &str, name: Option<String>) -> Result<(), ClientError> {
    let password = prompt("Choose a password").await?;
    let confirm = prompt("Confirm the password").await?;
    let profile = RegistrationProfile::new(email, &password, &confirm, name)?;

    let mut flow = client.start_registration(profile);
    let message = flow.send_code(Utc::now()).await?;
    info!("{message}");

    loop {
        let input = prompt("Enter the 6-digit code from your email (or 'resend')").await?;

        if input.eq_ignore_ascii_case("resend") {
            match flow.resend(Utc::now()).await {
                Ok(message) => info!("{message}"),
                Err(OtpError::ResendTooEarly { remaining }) => {
                    info!("You can request a new code in {remaining}");
                }
                Err(e) => return Err(e.into()),
            }
            continue;
        }

        flow.input_mut().set(&input);
        match flow.verify(Utc::now()).await {
            Ok(()) => break,
            Err(e @ (OtpError::Rejected(_) | OtpError::IncompleteCode)) => {
                warn!("{}", ClientError::from(e).user_message());
            }
            Err(OtpError::Expired | OtpError::TooManyAttempts) => {
                info!("This code can no longer be used. Type 'resend' for a new one once the countdown ends.");
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(challenge) = flow.challenge() {
            info!("Code expires in {}", challenge.countdown(Utc::now()));
        }
    }

    let session = flow.complete_registration(client.session()).await?;
    info!("Account created. Signed in as {}", session.identity.display_name());
    Ok(())
}

/// Sign out.
pub async fn logout(client: &PricePulse) -> Result<(), ClientError> {
    client.session().logout().await?;
    info!("Signed out");
    Ok(())
}

/// Show the signed-in user.
pub fn whoami(client: &PricePulse) {
    match client.session().current() {
        Some(session) => info!(
            email = %session.identity.email,
            source = %session.source,
            "Signed in as {}",
            session.identity.display_name()
        ),
        None => info!("Not signed in"),
    }
}
