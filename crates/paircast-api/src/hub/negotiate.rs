//! Connection negotiation.
//!
//! One POST to `{hub}/negotiate` before each connect attempt. The
//! server assigns a connection id, advertises its transports, and may
//! redirect the client to a different hub endpoint.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::hub::transports::{TransportKind, TransportSet};
use crate::transport::{http_base, join_path};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateReply {
    connection_id: String,
    #[serde(default)]
    available_transports: Vec<AdvertisedTransport>,
    /// Alternate hub endpoint to connect to instead of the negotiated
    /// one. Used by load-balanced deployments.
    #[serde(default)]
    url: Option<Url>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvertisedTransport {
    transport: String,
}

#[derive(Debug)]
pub(crate) struct NegotiateOutcome {
    pub connection_id: String,
    /// Usable transports, best first.
    pub transports: Vec<TransportKind>,
    pub redirect: Option<Url>,
}

/// Negotiate a connection at `hub_url`.
///
/// `token` is attached as a bearer credential and `api_key` as the
/// `X-Api-Key` header when present; the server decides whether
/// anonymous negotiation is acceptable.
pub(crate) async fn negotiate(
    http: &reqwest::Client,
    hub_url: &Url,
    token: Option<&str>,
    api_key: Option<&str>,
    allowed: TransportSet,
    cancel: &CancellationToken,
) -> Result<NegotiateOutcome, Error> {
    let base = http_base(hub_url)?;
    let url = join_path(&base, "negotiate")?;
    debug!("negotiating at {}", url);

    let mut request = http.post(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    if let Some(api_key) = api_key {
        request = request.header("X-Api-Key", api_key);
    }

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        resp = request.send() => resp.map_err(Error::Transport)?,
    };

    if response.status() == reqwest::StatusCode::UNAUTHORIZED {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::AuthFailure { reason: body });
    }

    let response = response.error_for_status()?;
    let body = response.text().await?;
    let reply: NegotiateReply =
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.clone(),
        })?;

    let transports = pick_transports(allowed, &reply.available_transports);
    if transports.is_empty() {
        return Err(Error::NoUsableTransport);
    }

    debug!(
        connection_id = %reply.connection_id,
        transports = %TransportSet::of(&transports),
        redirect = ?reply.url,
        "negotiate ok"
    );

    Ok(NegotiateOutcome {
        connection_id: reply.connection_id,
        transports,
        redirect: reply.url,
    })
}

/// Intersect the client's candidates with the server's advertisement,
/// preserving the client's dial priority. Advertised names the client
/// does not recognize are skipped.
fn pick_transports(
    allowed: TransportSet,
    advertised: &[AdvertisedTransport],
) -> Vec<TransportKind> {
    let mut server_side = TransportSet::EMPTY;
    for entry in advertised {
        match TransportKind::from_wire_name(&entry.transport) {
            Some(kind) => server_side.insert(kind),
            None => debug!("ignoring unknown advertised transport {:?}", entry.transport),
        }
    }
    allowed
        .iter()
        .filter(|&kind| server_side.contains(kind))
        .collect()
}
