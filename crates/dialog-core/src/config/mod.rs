//! Configuration for the SIP stack
//!
//! Everything the engine reads at runtime is passed in explicitly through
//! [`SipStackConfig`] (stack level) and [`SessionSettings`] (per dialog).
//! Both load from TOML through `rcs-infra-common`.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rcs_sip_transport::TransportType;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SipError};
use crate::keep_alive::KeepAliveRecovery;
use crate::transaction::timer::TimerSettings;

/// Kind of access network the device is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Cellular access; configured SIP timers apply
    #[default]
    Mobile,
    /// Wi-Fi access; RFC 3261 default timers apply
    Wifi,
}

/// Certificate material for TLS listening points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// PEM bundle of trusted roots; required when TLS is used
    pub ca_file: Option<PathBuf>,
    /// PEM certificate chain for the local listener
    pub cert_file: Option<PathBuf>,
    /// PEM private key for the local listener
    pub key_file: Option<PathBuf>,
    /// Name checked against the proxy certificate; the proxy address when unset
    pub server_name: Option<String>,
}

/// Stack level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SipStackConfig {
    /// Address of the local interface; also used in Via, Contact and Call-ID
    pub local_ip: IpAddr,
    /// Outbound proxy host name or address
    pub outbound_proxy_addr: String,
    pub outbound_proxy_port: u16,
    /// Transport used for requests
    pub default_protocol: TransportType,
    /// Allow UDP requests that approach the MTU to go over TCP
    pub tcp_fallback: bool,
    pub network_type: NetworkType,
    /// Path MTU in bytes
    pub mtu: usize,
    /// Local port; 0 picks an ephemeral one
    pub listening_port: u16,
    pub t1_ms: u64,
    pub t2_ms: u64,
    pub t4_ms: u64,
    pub keep_alive_enabled: bool,
    pub keep_alive_period_secs: u64,
    /// Upper bound for the keep-alive retry delay; `None` halts after a failure
    pub keep_alive_backoff_max_secs: Option<u64>,
    /// Default session refresh expire period (RFC 4028)
    pub session_refresh_expire_period_secs: u32,
    pub sip_trace_enabled: bool,
    pub sip_trace_file: PathBuf,
    pub tls: TlsSettings,
}

impl Default for SipStackConfig {
    fn default() -> Self {
        Self {
            local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            outbound_proxy_addr: "127.0.0.1".to_string(),
            outbound_proxy_port: 5060,
            default_protocol: TransportType::Udp,
            tcp_fallback: false,
            network_type: NetworkType::Mobile,
            mtu: 1500,
            listening_port: 0,
            t1_ms: TimerSettings::DEFAULT_T1_MS,
            t2_ms: TimerSettings::DEFAULT_T2_MS,
            t4_ms: TimerSettings::DEFAULT_T4_MS,
            keep_alive_enabled: true,
            keep_alive_period_secs: 120,
            keep_alive_backoff_max_secs: None,
            session_refresh_expire_period_secs: 1800,
            sip_trace_enabled: false,
            sip_trace_file: PathBuf::from("sip-trace.txt"),
            tls: TlsSettings::default(),
        }
    }
}

impl SipStackConfig {
    /// Creates a configuration for the given local address and proxy
    pub fn new(local_ip: IpAddr, proxy_addr: impl Into<String>, proxy_port: u16) -> Self {
        Self {
            local_ip,
            outbound_proxy_addr: proxy_addr.into(),
            outbound_proxy_port: proxy_port,
            ..Default::default()
        }
    }

    /// Parses a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(rcs_infra_common::config::from_toml_str(text)?)
    }

    /// Loads a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(rcs_infra_common::config::load_toml_file(path)?)
    }

    pub fn with_default_protocol(mut self, protocol: TransportType) -> Self {
        self.default_protocol = protocol;
        self
    }

    pub fn with_tcp_fallback(mut self, enabled: bool) -> Self {
        self.tcp_fallback = enabled;
        self
    }

    pub fn with_network_type(mut self, network_type: NetworkType) -> Self {
        self.network_type = network_type;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_listening_port(mut self, port: u16) -> Self {
        self.listening_port = port;
        self
    }

    /// Sets T1, T2 and T4 in milliseconds
    pub fn with_timers(mut self, t1_ms: u64, t2_ms: u64, t4_ms: u64) -> Self {
        self.t1_ms = t1_ms;
        self.t2_ms = t2_ms;
        self.t4_ms = t4_ms;
        self
    }

    pub fn with_keep_alive(mut self, enabled: bool, period_secs: u64) -> Self {
        self.keep_alive_enabled = enabled;
        self.keep_alive_period_secs = period_secs;
        self
    }

    /// Retries failed keep-alive cycles with a doubling delay up to `max_secs`
    pub fn with_keep_alive_backoff(mut self, max_secs: u64) -> Self {
        self.keep_alive_backoff_max_secs = Some(max_secs);
        self
    }

    pub fn with_session_refresh_expire_period(mut self, secs: u32) -> Self {
        self.session_refresh_expire_period_secs = secs;
        self
    }

    pub fn with_sip_trace(mut self, path: impl Into<PathBuf>) -> Self {
        self.sip_trace_enabled = true;
        self.sip_trace_file = path.into();
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    /// Checks the configuration for values the stack cannot start with
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.outbound_proxy_addr.trim().is_empty() {
            return Err("outbound proxy address is empty".to_string());
        }
        if self.outbound_proxy_port == 0 {
            return Err("outbound proxy port must not be 0".to_string());
        }
        if self.mtu <= 200 {
            return Err(format!("MTU {} is too small", self.mtu));
        }
        if self.t1_ms == 0 || self.t2_ms < self.t1_ms {
            return Err("T1 must be positive and not larger than T2".to_string());
        }
        if self.keep_alive_enabled && self.keep_alive_period_secs == 0 {
            return Err("keep-alive period must be positive".to_string());
        }
        if self.default_protocol == TransportType::Tls && self.tls.ca_file.is_none() {
            return Err("TLS requires a CA file".to_string());
        }
        if self.tls.cert_file.is_some() != self.tls.key_file.is_some() {
            return Err("TLS certificate and key must be configured together".to_string());
        }
        Ok(())
    }

    pub(crate) fn validated(&self) -> Result<()> {
        self.validate().map_err(SipError::initialization)
    }

    /// Transaction timers for the current network
    pub fn timer_settings(&self) -> TimerSettings {
        match self.network_type {
            NetworkType::Mobile => TimerSettings::new(
                Duration::from_millis(self.t1_ms),
                Duration::from_millis(self.t2_ms),
                Duration::from_millis(self.t4_ms),
            ),
            NetworkType::Wifi => TimerSettings::default(),
        }
    }

    /// Settings handed to dialog paths created on this stack
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            session_refresh_expire_period: self.session_refresh_expire_period_secs,
        }
    }

    pub fn keep_alive_period(&self) -> Duration {
        Duration::from_secs(self.keep_alive_period_secs)
    }

    pub fn keep_alive_recovery(&self) -> KeepAliveRecovery {
        match self.keep_alive_backoff_max_secs {
            Some(max) => KeepAliveRecovery::Backoff {
                max_delay: Duration::from_secs(max),
            },
            None => KeepAliveRecovery::Halt,
        }
    }
}

/// Per session settings consumed by [`SipDialogPath`](crate::SipDialogPath)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Default session refresh expire period in seconds
    pub session_refresh_expire_period: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_refresh_expire_period: 1800,
        }
    }
}

/// RFC 4028 session timer constants
pub struct SessionTimerSettings;

impl SessionTimerSettings {
    /// Smallest Session-Expires value a UA may request, in seconds
    pub const MIN_EXPIRE_PERIOD: u32 = 90;
    pub const UAC_ROLE: &'static str = "uac";
    pub const UAS_ROLE: &'static str = "uas";
    /// Registry key holding the last minimum negotiated through 422 responses
    pub const REGISTRY_MIN_SESSION_EXPIRE_PERIOD: &'static str = "MinSessionExpirePeriod";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = SipStackConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mtu, 1500);
        assert_eq!(config.keep_alive_recovery(), KeepAliveRecovery::Halt);
    }

    #[test]
    fn test_toml_overrides() {
        let config = SipStackConfig::from_toml_str(
            r#"
            local_ip = "10.0.0.5"
            outbound_proxy_addr = "pcscf.example.net"
            outbound_proxy_port = 5070
            default_protocol = "TCP"
            network_type = "wifi"
            keep_alive_backoff_max_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.local_ip, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(config.default_protocol, TransportType::Tcp);
        assert_eq!(config.network_type, NetworkType::Wifi);
        assert_eq!(
            config.keep_alive_recovery(),
            KeepAliveRecovery::Backoff {
                max_delay: Duration::from_secs(600)
            }
        );
        assert_eq!(config.session_refresh_expire_period_secs, 1800);
    }

    #[test]
    fn test_timers_depend_on_network() {
        let mobile = SipStackConfig::default().with_timers(1000, 8000, 9000);
        assert_eq!(mobile.timer_settings().t1, Duration::from_millis(1000));

        let wifi = mobile.with_network_type(NetworkType::Wifi);
        assert_eq!(wifi.timer_settings(), TimerSettings::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let tls = SipStackConfig::default().with_default_protocol(TransportType::Tls);
        assert!(tls.validate().unwrap_err().contains("CA file"));

        let half_tls = SipStackConfig::default().with_tls(TlsSettings {
            cert_file: Some("cert.pem".into()),
            ..Default::default()
        });
        assert!(half_tls.validate().is_err());

        assert!(SipStackConfig::default().with_mtu(100).validate().is_err());
        assert!(matches!(
            SipStackConfig::default().with_mtu(100).validated(),
            Err(SipError::Initialization { .. })
        ));
    }
}
