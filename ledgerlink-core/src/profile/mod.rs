//! Network connection profile
//!
//! A static JSON description of the network as seen from one organisation:
//! which organisation the client belongs to, its peers and certificate
//! authorities, and optionally orderers and per-channel membership for
//! sessions that run without discovery. The profile is loaded once and never
//! mutated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::transport::{rewrite_as_localhost, PeerTarget};

/// Profile loading and lookup errors
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to read profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse profile: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Organization not found in profile: {0}")]
    UnknownOrganization(String),

    #[error("Peer not found in profile: {0}")]
    UnknownPeer(String),

    #[error("Certificate authority not found in profile: {0}")]
    UnknownCertificateAuthority(String),

    #[error("Invalid profile: {0}")]
    Invalid(String),
}

/// Either a single PEM string or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PemList {
    One(String),
    Many(Vec<String>),
}

impl PemList {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let items: Vec<&str> = match self {
            PemList::One(pem) => vec![pem.as_str()],
            PemList::Many(pems) => pems.iter().map(String::as_str).collect(),
        };
        items.into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCaCerts {
    pub pem: PemList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSection {
    pub organization: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSection {
    pub mspid: String,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub certificate_authorities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSection {
    pub url: String,
    #[serde(rename = "tlsCACerts", default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_certs: Option<TlsCaCerts>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub grpc_options: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdererSection {
    pub url: String,
    #[serde(rename = "tlsCACerts", default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_certs: Option<TlsCaCerts>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAuthoritySection {
    pub url: String,
    pub ca_name: String,
    #[serde(rename = "tlsCACerts", default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_certs: Option<TlsCaCerts>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSection {
    #[serde(default)]
    pub orderers: Vec<String>,
    /// Peer name to role flags (`endorsingPeer`, `chaincodeQuery`, ...)
    #[serde(default)]
    pub peers: BTreeMap<String, serde_json::Value>,
}

/// Connection profile document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub client: ClientSection,
    pub organizations: BTreeMap<String, OrganizationSection>,
    #[serde(default)]
    pub peers: BTreeMap<String, PeerSection>,
    #[serde(default)]
    pub orderers: BTreeMap<String, OrdererSection>,
    #[serde(default)]
    pub certificate_authorities: BTreeMap<String, CertificateAuthoritySection>,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelSection>,
}

impl NetworkProfile {
    pub fn from_json(json: &str) -> Result<Self, ProfileError> {
        let profile: Self = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn to_json(&self) -> Result<String, ProfileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Every name referenced by an organisation or channel must be defined
    pub fn validate(&self) -> Result<(), ProfileError> {
        self.client_organization()?;
        for (org_name, org) in &self.organizations {
            for peer in &org.peers {
                if !self.peers.contains_key(peer) {
                    return Err(ProfileError::Invalid(format!(
                        "organization {} references undefined peer {}",
                        org_name, peer
                    )));
                }
            }
            for ca in &org.certificate_authorities {
                if !self.certificate_authorities.contains_key(ca) {
                    return Err(ProfileError::Invalid(format!(
                        "organization {} references undefined certificate authority {}",
                        org_name, ca
                    )));
                }
            }
        }
        for (channel, section) in &self.channels {
            if let Some(orderer) = section.orderers.iter().find(|o| !self.orderers.contains_key(*o)) {
                return Err(ProfileError::Invalid(format!(
                    "channel {} references undefined orderer {}",
                    channel, orderer
                )));
            }
            if let Some(peer) = section.peers.keys().find(|p| !self.peers.contains_key(*p)) {
                return Err(ProfileError::Invalid(format!(
                    "channel {} references undefined peer {}",
                    channel, peer
                )));
            }
        }
        Ok(())
    }

    /// Organisation the client acts for
    pub fn client_organization(&self) -> Result<&OrganizationSection, ProfileError> {
        self.organizations
            .get(&self.client.organization)
            .ok_or_else(|| ProfileError::UnknownOrganization(self.client.organization.clone()))
    }

    pub fn client_msp_id(&self) -> Result<&str, ProfileError> {
        Ok(&self.client_organization()?.mspid)
    }

    /// MSP id of the organisation that lists `peer_name`
    pub fn peer_msp_id(&self, peer_name: &str) -> Option<&str> {
        self.organizations
            .values()
            .find(|org| org.peers.iter().any(|p| p == peer_name))
            .map(|org| org.mspid.as_str())
    }

    pub fn peer_target(&self, peer_name: &str, as_localhost: bool) -> Result<PeerTarget, ProfileError> {
        let peer = self
            .peers
            .get(peer_name)
            .ok_or_else(|| ProfileError::UnknownPeer(peer_name.to_string()))?;
        let msp_id = self
            .peer_msp_id(peer_name)
            .ok_or_else(|| ProfileError::Invalid(format!("peer {} belongs to no organization", peer_name)))?;
        Ok(PeerTarget {
            name: peer_name.to_string(),
            url: endpoint(&peer.url, as_localhost),
            msp_id: msp_id.to_string(),
        })
    }

    /// Peers of the client's own organisation
    pub fn organization_peers(&self, as_localhost: bool) -> Result<Vec<PeerTarget>, ProfileError> {
        self.client_organization()?
            .peers
            .iter()
            .map(|name| self.peer_target(name, as_localhost))
            .collect()
    }

    /// Certificate authority by profile key (e.g. `ca.org1.example.com`)
    pub fn certificate_authority(&self, name: &str) -> Result<&CertificateAuthoritySection, ProfileError> {
        self.certificate_authorities
            .get(name)
            .ok_or_else(|| ProfileError::UnknownCertificateAuthority(name.to_string()))
    }

    /// Peers and orderer URLs statically configured for `channel`
    pub fn channel_members(
        &self,
        channel: &str,
        as_localhost: bool,
    ) -> Option<Result<(Vec<PeerTarget>, Vec<String>), ProfileError>> {
        let section = self.channels.get(channel)?;
        let peers = section
            .peers
            .keys()
            .map(|name| self.peer_target(name, as_localhost))
            .collect::<Result<Vec<_>, _>>();
        let orderers = section
            .orderers
            .iter()
            .map(|name| {
                self.orderers
                    .get(name)
                    .map(|o| endpoint(&o.url, as_localhost))
                    .ok_or_else(|| ProfileError::Invalid(format!("undefined orderer {}", name)))
            })
            .collect::<Result<Vec<_>, _>>();
        Some(peers.and_then(|peers| orderers.map(|orderers| (peers, orderers))))
    }
}

fn endpoint(url: &str, as_localhost: bool) -> String {
    if as_localhost {
        rewrite_as_localhost(url)
    } else {
        url.to_string()
    }
}
