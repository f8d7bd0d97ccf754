use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use shared::models::RequestMeta;

use super::AppState;

const MAX_USER_AGENT_CHARS: usize = 500;

/// Captures the caller's address, user agent and matched route so incident
/// records can describe where a request came from.
pub(super) async fn client_meta_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let meta = request_meta(&req, &state.trusted_proxy_ips);
    req.extensions_mut().insert(meta);
    next.run(req).await
}

pub(super) fn request_meta(req: &Request, trusted_proxy_ips: &HashSet<IpAddr>) -> RequestMeta {
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.chars().take(MAX_USER_AGENT_CHARS).collect());
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    RequestMeta {
        ip_address: remote_ip(req, trusted_proxy_ips).map(|ip| ip.to_string()),
        user_agent,
        endpoint: Some(endpoint),
    }
}

/// Peer address, or the right-most untrusted hop of `x-forwarded-for` when
/// the peer is a trusted proxy.
pub(super) fn remote_ip(req: &Request, trusted_proxy_ips: &HashSet<IpAddr>) -> Option<IpAddr> {
    let peer_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip())?;

    if !trusted_proxy_ips.contains(&peer_ip) {
        return Some(peer_ip);
    }

    forwarded_client_ip(req, trusted_proxy_ips, peer_ip).or(Some(peer_ip))
}

fn forwarded_client_ip(
    req: &Request,
    trusted_proxy_ips: &HashSet<IpAddr>,
    peer_ip: IpAddr,
) -> Option<IpAddr> {
    let mut chain = forwarded_for_chain(req);
    if !chain.is_empty() {
        chain.push(peer_ip);
        if let Some(client_ip) = chain
            .iter()
            .rev()
            .find(|ip| !trusted_proxy_ips.contains(ip))
            .copied()
        {
            return Some(client_ip);
        }
    }

    req.headers()
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok())
}

fn forwarded_for_chain(req: &Request) -> Vec<IpAddr> {
    req.headers()
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter_map(|entry| entry.parse::<IpAddr>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::{IpAddr, SocketAddr};

    use axum::body::Body;
    use axum::extract::{ConnectInfo, Request};
    use axum::http::header::{HeaderName, USER_AGENT};

    use super::{remote_ip, request_meta};

    fn request_from(peer: [u8; 4]) -> Request {
        let mut request = Request::builder()
            .uri("/v1/chat")
            .body(Body::empty())
            .expect("request builder should work");
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 8080))));
        request
    }

    #[test]
    fn untrusted_peer_ignores_spoofed_forward_headers() {
        let mut request = request_from([10, 20, 30, 40]);
        request.headers_mut().insert(
            HeaderName::from_static("x-forwarded-for"),
            "203.0.113.99".parse().expect("header value should parse"),
        );

        assert_eq!(
            remote_ip(&request, &HashSet::new()),
            Some(IpAddr::from([10, 20, 30, 40]))
        );
    }

    #[test]
    fn trusted_proxy_uses_rightmost_untrusted_hop() {
        let trusted = HashSet::from([IpAddr::from([10, 0, 0, 5]), IpAddr::from([10, 0, 0, 9])]);
        let mut request = request_from([10, 0, 0, 5]);
        request.headers_mut().append(
            HeaderName::from_static("x-forwarded-for"),
            "203.0.113.250".parse().expect("header value should parse"),
        );
        request.headers_mut().append(
            HeaderName::from_static("x-forwarded-for"),
            "198.51.100.20, 10.0.0.9"
                .parse()
                .expect("header value should parse"),
        );

        assert_eq!(
            remote_ip(&request, &trusted),
            Some(IpAddr::from([198, 51, 100, 20]))
        );
    }

    #[test]
    fn missing_connect_info_yields_no_address() {
        let request = Request::builder()
            .uri("/v1/chat")
            .body(Body::empty())
            .expect("request builder should work");
        assert_eq!(remote_ip(&request, &HashSet::new()), None);
    }

    #[test]
    fn request_meta_collects_user_agent_and_path() {
        let mut request = request_from([192, 0, 2, 1]);
        request.headers_mut().insert(
            USER_AGENT,
            "chat-client/1.0".parse().expect("header value should parse"),
        );

        let meta = request_meta(&request, &HashSet::new());
        assert_eq!(meta.ip_address.as_deref(), Some("192.0.2.1"));
        assert_eq!(meta.user_agent.as_deref(), Some("chat-client/1.0"));
        assert_eq!(meta.endpoint.as_deref(), Some("/v1/chat"));
    }
}
