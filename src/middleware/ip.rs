//! Client address normalization.
//!
//! Proxy headers are honoured only when the socket peer is a trusted proxy.
//! Otherwise the raw peer address is kept, so a client cannot choose the
//! address that rate limiting and logging see.

use std::net::IpAddr;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::config::parse_cidr;
use crate::context::RequestContext;
use crate::error::AppResult;
use crate::pipeline::{Flow, Stage, StageKind};

/// Set of proxy addresses or networks allowed to override the client address.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    networks: Vec<(IpAddr, u8)>,
}

impl TrustedProxies {
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> anyhow::Result<Self> {
        let networks = entries.iter().map(|e| parse_cidr(e.as_ref())).collect::<anyhow::Result<_>>()?;
        Ok(Self { networks })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = canonical(ip);
        self.networks.iter().any(|(net, prefix)| in_network(ip, canonical(*net), *prefix))
    }
}

fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

fn in_network(ip: IpAddr, net: IpAddr, prefix: u8) -> bool {
    match (ip, net) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) };
            (u32::from(a) & mask) == (u32::from(n) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - u32::from(prefix)) };
            (u128::from(a) & mask) == (u128::from(n) & mask)
        }
        _ => false,
    }
}

/// Resolves the client address for a connection coming from `peer`.
///
/// Header precedence: `CF-Connecting-IP`, then `X-Forwarded-For` (walked from
/// the right, skipping trusted hops), then `X-Real-IP`.
pub fn resolve_client_ip(headers: &HeaderMap, peer: IpAddr, trusted: &TrustedProxies) -> IpAddr {
    if !trusted.contains(peer) {
        return peer;
    }

    if let Some(ip) = single_ip_header(headers, "cf-connecting-ip") {
        return ip;
    }

    let hops: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|hv| hv.to_str().ok())
        .flat_map(|h| h.split(','))
        .filter_map(|part| part.trim().parse::<IpAddr>().ok())
        .collect();
    if let Some(client) = hops.iter().rev().find(|ip| !trusted.contains(**ip)) {
        return *client;
    }
    if let Some(first) = hops.first() {
        // Every hop is a trusted proxy: the origin is the leftmost entry.
        return *first;
    }

    single_ip_header(headers, "x-real-ip").unwrap_or(peer)
}

fn single_ip_header(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers.get(name).and_then(|hv| hv.to_str().ok()).and_then(|s| s.trim().parse::<IpAddr>().ok())
}

pub struct ClientIpStage {
    trusted: TrustedProxies,
}

impl ClientIpStage {
    pub fn new(trusted: TrustedProxies) -> Self {
        Self { trusted }
    }
}

#[async_trait]
impl Stage for ClientIpStage {
    fn kind(&self) -> StageKind {
        StageKind::ClientIp
    }

    fn name(&self) -> &'static str {
        "client-ip"
    }

    async fn process(&self, ctx: &mut RequestContext) -> AppResult<Flow> {
        if let Some(peer) = ctx.peer_addr {
            ctx.client_ip = resolve_client_ip(ctx.headers(), peer.ip(), &self.trusted);
        }
        Ok(Flow::Continue)
    }
}
