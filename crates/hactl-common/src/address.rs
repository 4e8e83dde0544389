//! Node address parsing helpers

use crate::error::HactlError;

/// Parse a node argument of the form `ring0_addr[,ring1_addr]`
///
/// A node joining a redundant-ring cluster carries two addresses
/// separated by a comma; a single-ring node carries one.
pub fn parse_multiring_node(spec: &str) -> Result<(String, Option<String>), HactlError> {
    let mut parts = spec.split(',').map(str::trim);
    let ring0 = parts.next().unwrap_or("").to_string();
    let ring1 = parts.next().map(str::to_string).filter(|s| !s.is_empty());
    if parts.next().is_some() {
        return Err(HactlError::validation(format!(
            "unable to parse node address '{}': at most two ring addresses are allowed",
            spec
        )));
    }
    if ring0.is_empty() {
        return Err(HactlError::validation(format!(
            "missing ring 0 address of the node '{}'",
            spec
        )));
    }
    Ok((ring0, ring1))
}

/// Split an `address[:port]` string
///
/// Returns the host part and the port when one is present. A bare
/// hostname or IPv4 address is returned unchanged with no port.
pub fn split_host_port(addr: &str) -> (String, Option<u16>) {
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (addr.to_string(), None),
        },
        _ => (addr.to_string(), None),
    }
}
