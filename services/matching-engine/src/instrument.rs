//! Instrument reference data
//!
//! Instruments are read-mostly: the engine only looks them up. The registry
//! here backs tests and embedded deployments; [`crate::persistence::PgStore`]
//! serves the same trait from the `instruments` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use services_common::{Px, Symbol};
use tracing::debug;

use crate::error::{StoreResult, ValidationError};

/// Tradable instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Ticker
    pub symbol: Symbol,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Industry sector
    pub sector: String,
    /// Current reference price
    pub reference_price: Px,
    /// Session high
    pub day_high: Px,
    /// Session low
    pub day_low: Px,
    /// Session volume in shares
    pub volume: i64,
    /// Market capitalisation in whole currency units
    pub market_cap: i64,
    /// Last refresh of this record
    pub last_updated: DateTime<Utc>,
}

impl Instrument {
    /// Check the record is fit to be listed
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidInstrument {
            symbol: self.symbol.to_string(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("stock name cannot be empty"));
        }
        if !self.reference_price.is_positive() {
            return Err(invalid("stock price must be greater than 0"));
        }
        if self.day_high < self.day_low {
            return Err(invalid("day high cannot be less than day low"));
        }
        if self.volume < 0 {
            return Err(invalid("volume cannot be negative"));
        }
        if self.market_cap <= 0 {
            return Err(invalid("market cap must be greater than 0"));
        }
        if self.sector.trim().is_empty() {
            return Err(invalid("sector cannot be empty"));
        }
        Ok(())
    }
}

/// Read access to listed instruments
#[async_trait]
pub trait InstrumentReference: Send + Sync {
    /// Instrument for `symbol`, or `None` if it is not listed
    async fn lookup(&self, symbol: &Symbol) -> StoreResult<Option<Instrument>>;

    /// All listed instruments, ordered by symbol
    async fn list(&self) -> StoreResult<Vec<Instrument>>;
}

/// In-memory instrument registry
#[derive(Debug, Default)]
pub struct InstrumentRegistry {
    instruments: RwLock<FxHashMap<Symbol, Instrument>>,
}

impl InstrumentRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the venue's default listing
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        {
            let mut instruments = registry.instruments.write();
            for instrument in default_catalogue() {
                instruments.insert(instrument.symbol.clone(), instrument);
            }
        }
        registry
    }

    /// List or refresh an instrument
    pub fn register(&self, instrument: Instrument) -> Result<(), ValidationError> {
        instrument.validate()?;
        debug!("Registering instrument {}", instrument.symbol);
        self.instruments.write().insert(instrument.symbol.clone(), instrument);
        Ok(())
    }

    /// Number of listed instruments
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.read().len()
    }

    /// Check if nothing is listed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.read().is_empty()
    }
}

#[async_trait]
impl InstrumentReference for InstrumentRegistry {
    async fn lookup(&self, symbol: &Symbol) -> StoreResult<Option<Instrument>> {
        Ok(self.instruments.read().get(symbol).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Instrument>> {
        let mut all: Vec<Instrument> = self.instruments.read().values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(all)
    }
}

/// The venue's fixed listing with opening reference data
#[must_use]
pub fn default_catalogue() -> Vec<Instrument> {
    const LISTING: [(&str, &str, &str, i64, i64); 10] = [
        ("NXTECH", "NexTech Systems", "Technology", 15_250, 48_000_000_000),
        ("QNTUM", "Quantum Dynamics", "Technology", 8_740, 21_500_000_000),
        ("CYBEX", "Cybex Security", "Technology", 6_315, 12_800_000_000),
        ("SOLRX", "SolarX Energy", "Energy", 4_290, 9_600_000_000),
        ("FUSON", "Fusion Power Group", "Energy", 11_875, 33_100_000_000),
        ("GENUM", "Genum Biosciences", "Healthcare", 9_420, 18_700_000_000),
        ("MEDIX", "Medix Therapeutics", "Healthcare", 5_560, 7_900_000_000),
        ("AITHN", "Aithon Intelligence", "Technology", 21_030, 64_200_000_000),
        ("NRLNK", "NeuraLink Devices", "Healthcare", 17_685, 41_300_000_000),
        ("COGNT", "Cognit Robotics", "Industrials", 7_150, 15_400_000_000),
    ];

    let now = Utc::now();
    LISTING
        .iter()
        .filter_map(|&(ticker, name, sector, cents, market_cap)| {
            let symbol = Symbol::parse(ticker).ok()?;
            let price = Px::from_cents(cents);
            Some(Instrument {
                symbol,
                name: name.to_string(),
                description: format!("{name} common stock"),
                sector: sector.to_string(),
                reference_price: price,
                day_high: price,
                day_low: price,
                volume: 0,
                market_cap,
                last_updated: now,
            })
        })
        .collect()
}
