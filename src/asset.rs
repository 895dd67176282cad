//! The per-asset configuration document.
//!
//! The document is hierarchical and every section is optional: absence of a
//! section simply deactivates the fetchers and scoring sub-components that
//! would consume it. Legacy dict-form pool/market sections from older config
//! files are not accepted; the canonical shape is list-form throughout, and
//! that shape is what the registry persists.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Chains the quantitative pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Ethereum,
    Base,
    Arbitrum,
    Optimism,
    Polygon,
    Solana,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Base => "base",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Polygon => "polygon",
            Chain::Solana => "solana",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(Chain::Ethereum),
            "base" => Ok(Chain::Base),
            "arbitrum" => Ok(Chain::Arbitrum),
            "optimism" => Ok(Chain::Optimism),
            "polygon" => Ok(Chain::Polygon),
            "solana" => Ok(Chain::Solana),
            other => Err(format!("unknown chain: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Wrapped,
    LiquidStaking,
    Stablecoin,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAddress {
    pub chain: Chain,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LendingProtocol {
    AaveV3,
    CompoundV3,
    Fluid,
}

impl fmt::Display for LendingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LendingProtocol::AaveV3 => "aave_v3",
            LendingProtocol::CompoundV3 => "compound_v3",
            LendingProtocol::Fluid => "fluid",
        };
        write!(f, "{name}")
    }
}

/// One lending-market integration. The protocol-specific anchors are all
/// optional; which ones matter depends on the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LendingConfig {
    pub protocol: LendingProtocol,
    pub chain: Chain,
    pub token_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_name: Option<String>,
}

impl LendingConfig {
    /// Stable label for logs and sample metadata.
    pub fn anchor(&self) -> String {
        self.market_name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.protocol, self.token_address))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DexProtocol {
    UniswapV3,
    Curve,
    PancakeswapV3,
}

impl fmt::Display for DexProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DexProtocol::UniswapV3 => "uniswap_v3",
            DexProtocol::Curve => "curve",
            DexProtocol::PancakeswapV3 => "pancakeswap_v3",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexPool {
    pub protocol: DexProtocol,
    pub chain: Chain,
    pub pool_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_name: Option<String>,
    /// Protocol-specific auxiliary keys (fee tier, gauge address, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceFeed {
    pub chain: Chain,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PorFeed {
    pub chain: Chain,
    pub aggregator: String,
    pub token_address: String,
}

/// How the reserve side of the PoR ratio is obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProofOfReserve {
    /// Chainlink PoR aggregators, one per chain, paired with the token
    /// supply on that chain.
    ChainlinkPor { feeds: Vec<PorFeed> },
    /// LST share accounting compared against the wrapped supply.
    LiquidStaking { staked_token: TokenAddress },
    /// Reserves reported by a configured backing source.
    Fractional { backing_source: String },
    /// NAV oracle whose answer is the ratio itself.
    NavBased { oracle: PriceFeed },
    /// HTML dashboard scraped with a parser hint.
    Scraper { url: String, parser_hint: String },
}

/// Quote-source identifiers for the token and its underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRisk {
    pub token_price_id: String,
    pub underlying_price_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityKind {
    Eoa,
    Multisig,
    DaoVoting,
    ContractUnknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DaoSafeguards {
    #[serde(default)]
    pub has_veto_power: bool,
    #[serde(default)]
    pub has_dual_governance: bool,
    #[serde(default)]
    pub quorum_pct: f64,
}

fn default_role_weight() -> f64 {
    3.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceRole {
    pub role_name: String,
    pub authority_kind: AuthorityKind,
    #[serde(default = "default_role_weight")]
    pub role_weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dao_safeguards: Option<DaoSafeguards>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CustodyModel {
    Decentralized,
    RegulatedInsured,
    Regulated,
    Unregulated,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistControl {
    #[default]
    None,
    Governance,
    Multisig,
    SingleEntity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Governance {
    #[serde(default)]
    pub roles: Vec<GovernanceRole>,
    #[serde(default)]
    pub has_timelock: bool,
    #[serde(default)]
    pub timelock_hours: f64,
    #[serde(default)]
    pub custody_model: CustodyModel,
    #[serde(default)]
    pub has_blacklist: bool,
    #[serde(default)]
    pub blacklist_control: BlacklistControl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    pub auditor: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub critical_issues_unresolved: u32,
    #[serde(default)]
    pub high_issues_unresolved: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub date: NaiveDate,
    #[serde(default)]
    pub funds_lost_usd: f64,
    #[serde(default)]
    pub funds_lost_pct_of_tvl: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<NaiveDate>,
}

fn default_decimals() -> u8 {
    18
}

/// The full per-asset configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    #[serde(default)]
    pub asset_type: AssetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying: Option<String>,
    #[serde(default = "default_decimals")]
    pub decimals: u8,

    #[serde(default)]
    pub token_addresses: Vec<TokenAddress>,
    #[serde(default)]
    pub lending_configs: Vec<LendingConfig>,
    #[serde(default)]
    pub dex_pools: Vec<DexPool>,
    #[serde(default)]
    pub price_feeds: Vec<PriceFeed>,
    #[serde(default)]
    pub cross_chain_feeds: Vec<PriceFeed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_of_reserve: Option<ProofOfReserve>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_risk: Option<PriceRisk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<Governance>,

    #[serde(default)]
    pub audit_data: Vec<Audit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_date: Option<NaiveDate>,
    #[serde(default)]
    pub incidents: Vec<Incident>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            asset_type: AssetType::default(),
            underlying: None,
            decimals: default_decimals(),
            token_addresses: Vec::new(),
            lending_configs: Vec::new(),
            dex_pools: Vec::new(),
            price_feeds: Vec::new(),
            cross_chain_feeds: Vec::new(),
            proof_of_reserve: None,
            price_risk: None,
            governance: None,
            audit_data: Vec::new(),
            deployment_date: None,
            incidents: Vec::new(),
        }
    }
}

/// Structural config rejection. Never retried.
#[derive(Debug)]
pub enum ConfigError {
    /// A field fails validation; `path` names the offending location.
    Invalid { path: String, message: String },
    /// The stored document could not be parsed back at all.
    Malformed(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { path, message } => {
                write!(f, "invalid config at {path}: {message}")
            }
            ConfigError::Malformed(msg) => write!(f, "malformed config document: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl AssetConfig {
    /// Chains the asset is declared on.
    pub fn declared_chains(&self) -> HashSet<Chain> {
        self.token_addresses.iter().map(|t| t.chain).collect()
    }

    /// Structural validation. Every lending and DEX integration must live
    /// on a chain the token is declared on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chains = self.declared_chains();

        for (i, token) in self.token_addresses.iter().enumerate() {
            if token.address.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("token_addresses[{i}].address"),
                    "address must not be empty",
                ));
            }
        }

        for (i, lending) in self.lending_configs.iter().enumerate() {
            if !chains.contains(&lending.chain) {
                return Err(ConfigError::invalid(
                    format!("lending_configs[{i}].chain"),
                    format!("chain {} has no entry in token_addresses", lending.chain),
                ));
            }
            if lending.token_address.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("lending_configs[{i}].token_address"),
                    "address must not be empty",
                ));
            }
        }

        for (i, pool) in self.dex_pools.iter().enumerate() {
            if !chains.contains(&pool.chain) {
                return Err(ConfigError::invalid(
                    format!("dex_pools[{i}].chain"),
                    format!("chain {} has no entry in token_addresses", pool.chain),
                ));
            }
            if pool.pool_address.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("dex_pools[{i}].pool_address"),
                    "address must not be empty",
                ));
            }
        }

        if let Some(governance) = &self.governance {
            for (i, role) in governance.roles.iter().enumerate() {
                if role.role_weight <= 0.0 {
                    return Err(ConfigError::invalid(
                        format!("governance.roles[{i}].role_weight"),
                        "role weight must be positive",
                    ));
                }
                if role.authority_kind == AuthorityKind::Multisig {
                    let threshold = role.threshold.ok_or_else(|| {
                        ConfigError::invalid(
                            format!("governance.roles[{i}].threshold"),
                            "multisig roles require a threshold",
                        )
                    })?;
                    let signers = role.signer_count.ok_or_else(|| {
                        ConfigError::invalid(
                            format!("governance.roles[{i}].signer_count"),
                            "multisig roles require a signer count",
                        )
                    })?;
                    if signers == 0 || threshold == 0 || threshold > signers {
                        return Err(ConfigError::invalid(
                            format!("governance.roles[{i}]"),
                            format!("invalid multisig shape {threshold}/{signers}"),
                        ));
                    }
                }
            }

            if governance.has_timelock && governance.timelock_hours < 0.0 {
                return Err(ConfigError::invalid(
                    "governance.timelock_hours",
                    "timelock delay must be non-negative",
                ));
            }
        }

        if let Some(ProofOfReserve::ChainlinkPor { feeds }) = &self.proof_of_reserve {
            if feeds.is_empty() {
                return Err(ConfigError::invalid(
                    "proof_of_reserve.feeds",
                    "chainlink_por requires at least one aggregator",
                ));
            }
        }

        for (i, incident) in self.incidents.iter().enumerate() {
            if let Some(resolved) = incident.resolved_at {
                if resolved < incident.date {
                    return Err(ConfigError::invalid(
                        format!("incidents[{i}].resolved_at"),
                        "resolution cannot predate the incident",
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AssetConfig {
        AssetConfig {
            asset_type: AssetType::Wrapped,
            underlying: Some("BTC".to_string()),
            token_addresses: vec![TokenAddress {
                chain: Chain::Ethereum,
                address: "0xc02a".to_string(),
            }],
            ..AssetConfig::default()
        }
    }

    #[test]
    fn minimal_config_validates() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn lending_on_undeclared_chain_is_rejected_with_path() {
        let mut config = base_config();
        config.lending_configs.push(LendingConfig {
            protocol: LendingProtocol::AaveV3,
            chain: Chain::Base,
            token_address: "0xdead".to_string(),
            pool: None,
            data_provider: None,
            comet: None,
            market_name: None,
        });

        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Invalid { path, .. } => assert_eq!(path, "lending_configs[0].chain"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dex_pool_on_undeclared_chain_is_rejected() {
        let mut config = base_config();
        config.dex_pools.push(DexPool {
            protocol: DexProtocol::UniswapV3,
            chain: Chain::Arbitrum,
            pool_address: "0xbeef".to_string(),
            pool_name: None,
            extra: serde_json::Map::new(),
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn multisig_role_requires_threshold_and_signers() {
        let mut config = base_config();
        config.governance = Some(Governance {
            roles: vec![GovernanceRole {
                role_name: "owner".to_string(),
                authority_kind: AuthorityKind::Multisig,
                role_weight: 3.0,
                address: None,
                threshold: Some(5),
                signer_count: Some(3),
                dao_safeguards: None,
            }],
            ..Governance::default()
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut config = base_config();
        config.proof_of_reserve = Some(ProofOfReserve::ChainlinkPor {
            feeds: vec![PorFeed {
                chain: Chain::Ethereum,
                aggregator: "0xaaaa".to_string(),
                token_address: "0xc02a".to_string(),
            }],
        });
        config.price_risk = Some(PriceRisk {
            token_price_id: "wrapped-bitcoin".to_string(),
            underlying_price_id: "bitcoin".to_string(),
        });

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["proof_of_reserve"]["kind"], "chainlink_por");

        let back: AssetConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn role_weight_defaults_to_three() {
        let role: GovernanceRole = serde_json::from_value(serde_json::json!({
            "role_name": "pauser",
            "authority_kind": "eoa"
        }))
        .unwrap();
        assert_eq!(role.role_weight, 3.0);
    }
}
