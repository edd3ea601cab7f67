//! Provider endpoint registry
//!
//! Maps each logical operation to the provider's `function` constant and the
//! parameters it takes, and builds request URLs from them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use reqwest::Url;

use super::client::FetchError;
use crate::cache::build_key;
use crate::credential::Credential;

/// Default provider host
pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

/// Interval used for intraday series when the caller gives none
pub const DEFAULT_INTRADAY_INTERVAL: &str = "5min";

/// The logical operations the provider supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    TopGainersLosers,
    CompanyOverview,
    TickerSearch,
    DailyTimeSeries,
    MonthlyTimeSeries,
    IntradayTimeSeries,
}

/// Static description of one provider endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Value of the `function` query parameter
    pub function: &'static str,
    /// Parameters that must be supplied
    pub required: &'static [&'static str],
    /// Parameters that may be supplied, with their defaults
    pub optional: &'static [(&'static str, &'static str)],
}

const TOP_GAINERS_LOSERS: EndpointSpec = EndpointSpec {
    function: "TOP_GAINERS_LOSERS",
    required: &[],
    optional: &[],
};

const COMPANY_OVERVIEW: EndpointSpec = EndpointSpec {
    function: "OVERVIEW",
    required: &["symbol"],
    optional: &[],
};

const TICKER_SEARCH: EndpointSpec = EndpointSpec {
    function: "SYMBOL_SEARCH",
    required: &["keywords"],
    optional: &[],
};

const DAILY_TIME_SERIES: EndpointSpec = EndpointSpec {
    function: "TIME_SERIES_DAILY_ADJUSTED",
    required: &["symbol"],
    optional: &[],
};

const MONTHLY_TIME_SERIES: EndpointSpec = EndpointSpec {
    function: "TIME_SERIES_MONTHLY_ADJUSTED",
    required: &["symbol"],
    optional: &[],
};

const INTRADAY_TIME_SERIES: EndpointSpec = EndpointSpec {
    function: "TIME_SERIES_INTRADAY",
    required: &["symbol"],
    optional: &[("interval", DEFAULT_INTRADAY_INTERVAL)],
};

impl Operation {
    /// Every supported operation
    pub const ALL: [Operation; 6] = [
        Operation::TopGainersLosers,
        Operation::CompanyOverview,
        Operation::TickerSearch,
        Operation::DailyTimeSeries,
        Operation::MonthlyTimeSeries,
        Operation::IntradayTimeSeries,
    ];

    /// The operation's name as used in cache keys and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Operation::TopGainersLosers => "topGainersLosers",
            Operation::CompanyOverview => "companyOverview",
            Operation::TickerSearch => "tickerSearch",
            Operation::DailyTimeSeries => "dailyTimeSeries",
            Operation::MonthlyTimeSeries => "monthlyTimeSeries",
            Operation::IntradayTimeSeries => "intradayTimeSeries",
        }
    }

    pub fn spec(&self) -> &'static EndpointSpec {
        match self {
            Operation::TopGainersLosers => &TOP_GAINERS_LOSERS,
            Operation::CompanyOverview => &COMPANY_OVERVIEW,
            Operation::TickerSearch => &TICKER_SEARCH,
            Operation::DailyTimeSeries => &DAILY_TIME_SERIES,
            Operation::MonthlyTimeSeries => &MONTHLY_TIME_SERIES,
            Operation::IntradayTimeSeries => &INTRADAY_TIME_SERIES,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| FetchError::UnknownOperation(s.to_string()))
    }
}

/// An operation with its parameters checked and defaulted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub operation: Operation,
    /// Only the parameters the endpoint uses, sorted by name
    pub params: BTreeMap<String, String>,
}

impl Request {
    /// Resolves caller parameters against the operation's endpoint
    ///
    /// Required parameters must be present and non-blank, optional ones are
    /// filled with their defaults, and anything the endpoint does not take is
    /// dropped.
    pub fn resolve<I, K, V>(operation: Operation, params: I) -> Result<Self, FetchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut given: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let spec = operation.spec();
        let mut resolved = BTreeMap::new();

        for &name in spec.required {
            match given.remove(name) {
                Some(value) if !value.trim().is_empty() => {
                    resolved.insert(name.to_string(), value);
                }
                _ => {
                    return Err(FetchError::MissingParameter {
                        operation,
                        parameter: name,
                    })
                }
            }
        }
        for &(name, default) in spec.optional {
            let value = given
                .remove(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string());
            resolved.insert(name.to_string(), value);
        }

        Ok(Self {
            operation,
            params: resolved,
        })
    }

    /// The canonical cache key for this request
    pub fn cache_key(&self) -> String {
        build_key(self.operation.name(), &self.params)
    }
}

/// Builds provider URLs against a base host
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    base_url: String,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl EndpointRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    /// Builds the request URL: `function`, the resolved parameters, then `apikey`
    pub fn url_for(&self, request: &Request, credential: &Credential) -> Result<Url, FetchError> {
        let endpoint = format!("{}/query", self.base_url);
        let query = std::iter::once(("function", request.operation.spec().function))
            .chain(
                request
                    .params
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            )
            .chain(std::iter::once(("apikey", credential.as_str())));

        Url::parse_with_params(&endpoint, query)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", endpoint, e)))
    }
}
