//! Setup option validation
//!
//! Raw setup options are validated and completed into one bundle that
//! feeds both configuration paths: the structured corosync.conf
//! generator and the legacy CMAN command plan. Each rule produces a
//! structured report; forceable errors are downgraded to warnings when
//! the caller supplies the force override.

use hactl_common::ReportItem;

/// Membership transport kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Transport {
    /// Multicast UDP
    Udp,
    /// Unicast UDP
    #[default]
    Udpu,
    /// Broadcast UDP, only produced for the legacy substrate
    Udpb,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Udpu => "udpu",
            Transport::Udpb => "udpb",
        }
    }

    fn from_user_value(value: &str) -> Option<Self> {
        match value {
            "udp" => Some(Transport::Udp),
            "udpu" => Some(Transport::Udpu),
            _ => None,
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Redundant ring protocol mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RrpMode {
    Passive,
    Active,
}

impl RrpMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RrpMode::Passive => "passive",
            RrpMode::Active => "active",
        }
    }
}

impl std::fmt::Display for RrpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpVersion {
    Ipv6,
}

impl std::fmt::Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ipv6")
    }
}

/// Per-ring interface options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RingOptions {
    /// Network bind address, multicast transport only
    pub bind_addr: Option<String>,
    pub broadcast: bool,
    pub mcastaddr: Option<String>,
    pub mcastport: Option<String>,
    pub ttl: Option<String>,
}

/// Validated transport-level options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportOptions {
    pub transport: Transport,
    pub rrp_mode: Option<RrpMode>,
    pub ip_version: Option<IpVersion>,
    pub rings: Vec<RingOptions>,
    /// Cluster-wide broadcast, legacy substrate only
    pub broadcast: bool,
}

/// Totem timing parameters, passed through verbatim
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TotemOptions {
    pub token: Option<String>,
    pub token_coefficient: Option<String>,
    pub join: Option<String>,
    pub consensus: Option<String>,
    pub miss_count_const: Option<String>,
    pub fail_recv_const: Option<String>,
}

impl TotemOptions {
    /// Present options in their canonical emission order
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("token", &self.token),
            ("token_coefficient", &self.token_coefficient),
            ("join", &self.join),
            ("consensus", &self.consensus),
            ("miss_count_const", &self.miss_count_const),
            ("fail_recv_const", &self.fail_recv_const),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .collect()
    }
}

/// Quorum behavior flags, passed through verbatim
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuorumOptions {
    pub wait_for_all: Option<String>,
    pub auto_tie_breaker: Option<String>,
    pub last_man_standing: Option<String>,
    pub last_man_standing_window: Option<String>,
}

impl QuorumOptions {
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("wait_for_all", &self.wait_for_all),
            ("auto_tie_breaker", &self.auto_tie_breaker),
            ("last_man_standing", &self.last_man_standing),
            ("last_man_standing_window", &self.last_man_standing_window),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
        .collect()
    }

    pub fn auto_tie_breaker_active(&self) -> bool {
        self.auto_tie_breaker.as_deref() == Some("1")
    }
}

/// Raw setup options as collected from the caller
#[derive(Clone, Debug, Default)]
pub struct SetupOptionsInput {
    pub transport: Option<String>,
    pub rrp_mode: Option<String>,
    pub ipv6: bool,
    /// Ring bind addresses, multicast transport only
    pub ring_addr: [Option<String>; 2],
    pub broadcast: [bool; 2],
    pub mcast_addr: [Option<String>; 2],
    pub mcast_port: [Option<String>; 2],
    pub ttl: [Option<String>; 2],
    pub token: Option<String>,
    pub token_coefficient: Option<String>,
    pub join: Option<String>,
    pub consensus: Option<String>,
    pub miss_count_const: Option<String>,
    pub fail_recv_const: Option<String>,
    pub wait_for_all: Option<String>,
    pub auto_tie_breaker: Option<String>,
    pub last_man_standing: Option<String>,
    pub last_man_standing_window: Option<String>,
}

/// The complete validated option bundle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatedOptions {
    pub transport: TransportOptions,
    pub totem: TotemOptions,
    pub quorum: QuorumOptions,
}

fn report(force: bool, message: String) -> ReportItem {
    let item = ReportItem::error(message).forceable();
    if force { item.downgraded() } else { item }
}

fn totem_from_input(input: &SetupOptionsInput) -> TotemOptions {
    TotemOptions {
        token: input.token.clone(),
        token_coefficient: input.token_coefficient.clone(),
        join: input.join.clone(),
        consensus: input.consensus.clone(),
        miss_count_const: input.miss_count_const.clone(),
        fail_recv_const: input.fail_recv_const.clone(),
    }
}

fn validate_rrp_mode(
    input: &SetupOptionsInput,
    force: bool,
    reports: &mut Vec<ReportItem>,
) -> Option<RrpMode> {
    if input.rrp_mode.is_none() && input.ring_addr[0].is_none() {
        return None;
    }
    let mode = match input.rrp_mode.as_deref() {
        None | Some("passive") => RrpMode::Passive,
        Some("active") => RrpMode::Active,
        Some(other) => {
            reports.push(report(
                force,
                format!(
                    "invalid RRP mode value: '{}', allowed values are: passive, active",
                    other
                ),
            ));
            RrpMode::Passive
        }
    };
    if mode == RrpMode::Active {
        reports.push(report(force, "using RRP active mode is not supported".to_string()));
    }
    Some(mode)
}

/// Validate and complete options for the structured corosync substrate
pub fn validate_corosync_options(
    input: &SetupOptionsInput,
    force: bool,
) -> (ValidatedOptions, Vec<ReportItem>) {
    let mut reports = Vec::new();

    let transport = match input.transport.as_deref() {
        None => Transport::Udpu,
        Some(value) => Transport::from_user_value(value).unwrap_or_else(|| {
            reports.push(report(
                force,
                format!(
                    "invalid transport value: '{}', allowed values are: udp, udpu",
                    value
                ),
            ));
            Transport::default()
        }),
    };

    if transport == Transport::Udpu && input.ring_addr.iter().any(Option::is_some) {
        reports.push(report(
            force,
            "--addr0 and --addr1 can only be used with --transport=udp".to_string(),
        ));
    }

    let rrp_mode = validate_rrp_mode(input, force, &mut reports);

    let mut rings = Vec::new();
    if transport == Transport::Udp && input.ring_addr[0].is_some() {
        let ring_count = if input.ring_addr[1].is_some() { 2 } else { 1 };
        for ring in 0..ring_count {
            let mut options = RingOptions {
                bind_addr: input.ring_addr[ring].clone(),
                ..RingOptions::default()
            };
            if input.broadcast[ring] {
                options.broadcast = true;
            } else {
                options.mcastaddr = Some(
                    input.mcast_addr[ring]
                        .clone()
                        .unwrap_or_else(|| format!("239.255.{}.1", ring + 1)),
                );
                options.mcastport = Some(
                    input.mcast_port[ring]
                        .clone()
                        .unwrap_or_else(|| "5405".to_string()),
                );
                options.ttl = input.ttl[ring].clone();
            }
            rings.push(options);
        }
    }

    for flag in [
        ("--wait_for_all", &input.wait_for_all),
        ("--auto_tie_breaker", &input.auto_tie_breaker),
        ("--last_man_standing", &input.last_man_standing),
    ] {
        if let Some(value) = flag.1
            && value != "0"
            && value != "1"
        {
            reports.push(ReportItem::error(format!(
                "invalid {} value: '{}', allowed values are: 0, 1",
                flag.0, value
            )));
        }
    }

    let validated = ValidatedOptions {
        transport: TransportOptions {
            transport,
            rrp_mode,
            ip_version: input.ipv6.then_some(IpVersion::Ipv6),
            rings,
            broadcast: false,
        },
        totem: totem_from_input(input),
        quorum: QuorumOptions {
            wait_for_all: input.wait_for_all.clone(),
            auto_tie_breaker: input.auto_tie_breaker.clone(),
            last_man_standing: input.last_man_standing.clone(),
            last_man_standing_window: input.last_man_standing_window.clone(),
        },
    };
    (validated, reports)
}

/// Validate and complete options for the legacy CMAN substrate
///
/// Both substrates must reject the same invalid transport/RRP
/// combinations; CMAN additionally turns broadcast into its own
/// transport kind and reports corosync-only flags as ignored.
pub fn validate_cman_options(
    input: &SetupOptionsInput,
    force: bool,
) -> (ValidatedOptions, Vec<ReportItem>) {
    let mut reports = Vec::new();

    let broadcast = input.broadcast.iter().any(|b| *b);
    let transport = if broadcast {
        if !input.broadcast.iter().all(|b| *b) {
            reports.push(ReportItem::warning(
                "Enabling broadcast for all rings as CMAN does not support broadcast in only one ring",
            ));
        }
        Transport::Udpb
    } else {
        match input.transport.as_deref() {
            None => Transport::Udp,
            Some(value) => Transport::from_user_value(value).unwrap_or_else(|| {
                reports.push(report(
                    force,
                    format!(
                        "invalid transport value: '{}', allowed values are: udp, udpu",
                        value
                    ),
                ));
                Transport::Udp
            }),
        }
    };

    if transport == Transport::Udpu {
        reports.push(ReportItem::warning(
            "Using udpu transport on a CMAN cluster, cluster restart is required after node add/remove",
        ));
    }
    if transport == Transport::Udpu && input.ring_addr.iter().any(Option::is_some) {
        reports.push(report(
            force,
            "--addr0 and --addr1 can only be used with --transport=udp".to_string(),
        ));
    }

    let rrp_mode = validate_rrp_mode(input, force, &mut reports);

    let mut rings = Vec::new();
    if !broadcast {
        for ring in 0..2 {
            if input.ring_addr[ring].is_none() {
                continue;
            }
            rings.push(RingOptions {
                bind_addr: None,
                broadcast: false,
                mcastaddr: Some(
                    input.mcast_addr[ring]
                        .clone()
                        .unwrap_or_else(|| format!("239.255.{}.1", ring + 1)),
                ),
                mcastport: input.mcast_port[ring].clone(),
                ttl: input.ttl[ring].clone(),
            });
        }
    }

    for (name, present) in [
        ("--wait_for_all", input.wait_for_all.is_some()),
        ("--auto_tie_breaker", input.auto_tie_breaker.is_some()),
        ("--last_man_standing", input.last_man_standing.is_some()),
        (
            "--last_man_standing_window",
            input.last_man_standing_window.is_some(),
        ),
        ("--token_coefficient", input.token_coefficient.is_some()),
        ("--ipv6", input.ipv6),
    ] {
        if present {
            reports.push(ReportItem::warning(format!(
                "{} ignored as it is not supported on CMAN clusters",
                name
            )));
        }
    }

    let validated = ValidatedOptions {
        transport: TransportOptions {
            transport,
            rrp_mode,
            ip_version: None,
            rings,
            broadcast,
        },
        totem: TotemOptions {
            token_coefficient: None,
            ..totem_from_input(input)
        },
        quorum: QuorumOptions::default(),
    };
    (validated, reports)
}
