//! # Dummy Oracle Blueprint
//! Price source for testing without external dependencies. Prices are reported with the current
//! time unless a reading time is pinned, which lets tests simulate stale readings.

use scrypto::prelude::*;

#[derive(ScryptoSbor, Clone)]
pub struct PriceEntry {
    pub price: Decimal,
    /// Reported reading time. `None` reports the current time.
    pub pinned_timestamp: Option<i64>,
}

#[blueprint]
mod oracle {
    enable_method_auth! {
        methods {
            get_price => PUBLIC;
            set_price => PUBLIC;
            set_price_timestamp => PUBLIC;
        }
    }

    struct Oracle {
        prices: HashMap<ResourceAddress, PriceEntry>,
    }

    impl Oracle {
        pub fn instantiate_oracle(initial_prices: Vec<(ResourceAddress, Decimal)>) -> Global<Oracle> {
            let mut prices: HashMap<ResourceAddress, PriceEntry> = HashMap::new();
            for (collateral, price) in initial_prices {
                prices.insert(
                    collateral,
                    PriceEntry {
                        price,
                        pinned_timestamp: None,
                    },
                );
            }

            Self { prices }
                .instantiate()
                .prepare_to_globalize(OwnerRole::None)
                .metadata(metadata! {
                    init {
                        "name" => "Tidal Dummy Oracle".to_string(), updatable;
                        "description" => "A dummy oracle used for testing Tidal".to_string(), updatable;
                        "info_url" => Url::of("https://tidal.finance"), updatable;
                    }
                })
                .globalize()
        }

        /// Returns the price of `collateral` and the time it was read.
        pub fn get_price(&self, collateral: ResourceAddress) -> (Decimal, i64) {
            let entry = self
                .prices
                .get(&collateral)
                .expect("Price not set for this collateral");
            let timestamp = entry
                .pinned_timestamp
                .unwrap_or_else(|| Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch);
            (entry.price, timestamp)
        }

        pub fn set_price(&mut self, collateral: ResourceAddress, price: Decimal) {
            let pinned_timestamp = self
                .prices
                .get(&collateral)
                .and_then(|entry| entry.pinned_timestamp);
            self.prices.insert(
                collateral,
                PriceEntry {
                    price,
                    pinned_timestamp,
                },
            );
        }

        /// Pins the reported reading time of `collateral`. `None` goes back to reporting the current time.
        pub fn set_price_timestamp(&mut self, collateral: ResourceAddress, timestamp: Option<i64>) {
            let entry = self
                .prices
                .get_mut(&collateral)
                .expect("Price not set for this collateral");
            entry.pinned_timestamp = timestamp;
        }
    }
}
