//! RCS feature tag extraction from Contact and Accept-Contact headers.
//!
//! A feature tag is a header parameter whose name starts with `+`
//! (`+g.3gpp.icsi-ref`, `+g.oma.sip-im` ...). On the Contact header two
//! listed names are accepted as well, see [`FEATURE_RCSE_IP_VIDEO_CALL`] and
//! [`FEATURE_SIP_AUTOMATA`]; Accept-Contact keeps `+` names only.
//! Parameters carrying a comma separated list are expanded into one
//! `name="value"` entry per list element.

use std::collections::HashSet;

use tracing::debug;

use crate::accessors::SipMessageExt;
use crate::parser::utils::{split_top_level, unquote};
use crate::types::address::NameAddr;
use crate::types::header::HeaderName;

/// Feature tag for an IP video call capability
pub const FEATURE_RCSE_IP_VIDEO_CALL: &str = "+g.gsma.rcs.ipvideocall";

/// RFC 3840 `automata` media feature tag
pub const FEATURE_SIP_AUTOMATA: &str = "automata";

/// Contact parameter carrying the device instance id; never a feature tag
pub const SIP_INSTANCE_PARAM: &str = "+sip.instance";

/// Whether a Contact parameter name qualifies as a feature tag
pub fn is_feature_tag_name(name: &str) -> bool {
    name.starts_with('+') || name == FEATURE_RCSE_IP_VIDEO_CALL || name == FEATURE_SIP_AUTOMATA
}

fn add_tag(tags: &mut HashSet<String>, name: &str, value: Option<&str>) {
    if name.starts_with(SIP_INSTANCE_PARAM) {
        return;
    }
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => {
            tags.insert(name.to_string());
        }
        Some(value) => {
            for v in value.split(',') {
                let v = v.trim();
                if !v.is_empty() {
                    tags.insert(format!("{}=\"{}\"", name, v));
                }
            }
        }
    }
}

/// Collects the feature tags advertised by a message
pub fn extract_feature_tags<M: SipMessageExt + ?Sized>(message: &M) -> HashSet<String> {
    let mut tags = HashSet::new();

    if let Some(contact) = message.header(&HeaderName::Contact) {
        let first = split_top_level(contact, ',').into_iter().next().unwrap_or("");
        match first.parse::<NameAddr>() {
            Ok(addr) => {
                for p in addr.params.iter() {
                    let name = p.name.trim();
                    if is_feature_tag_name(name) {
                        add_tag(&mut tags, name, p.value());
                    }
                }
            }
            Err(e) => debug!("Contact header ignored for feature tags: {}", e),
        }
    }

    for value in message.header_values(&HeaderName::AcceptContact) {
        for entry in split_top_level(value, ',') {
            // The first element is the `*` address; only parameters follow it
            for param in entry.split(';').skip(1) {
                let (name, value) = match param.split_once('=') {
                    Some((n, v)) => (n.trim(), Some(unquote(v))),
                    None => (param.trim(), None),
                };
                if name.starts_with('+') {
                    add_tag(&mut tags, name, value);
                }
            }
        }
    }

    tags
}
