// src/models.rs
use crate::cache::CacheStats;
use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Body shape shared by every endpoint: `{status, data, message}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: ResponseStatus,
    pub data: Option<T>,
    pub message: String,
}

impl<T> Envelope<T> {
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Envelope {
            status: ResponseStatus::Success,
            data: Some(data),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Envelope {
            status: ResponseStatus::Error,
            data: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub uptime_secs: u64,
    pub timestamp: String,
    pub environment: String,
    pub cache: CacheStats,
}

/// Raw query-string pairs, as warp hands them over.
pub type QueryPairs = Vec<(String, String)>;

/// Picks the value of `name` out of the query pairs. A parameter sent twice
/// is a validation error instead of a silent last-one-wins.
fn single_value(pairs: &[(String, String)], name: &str) -> Result<Option<String>, ApiError> {
    let mut found = None;
    for (key, value) in pairs {
        if key != name {
            continue;
        }
        if found.is_some() {
            return Err(ApiError::Validation(format!(
                "Duplicate query parameter '{}'",
                name
            )));
        }
        found = Some(value.clone());
    }
    Ok(found)
}

#[derive(Debug, Default)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub query: Option<String>,
}

impl SearchQuery {
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, ApiError> {
        Ok(SearchQuery {
            q: single_value(pairs, "q")?,
            query: single_value(pairs, "query")?,
        })
    }

    pub fn text(&self) -> &str {
        self.q
            .as_deref()
            .or(self.query.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct HistoricalQuery {
    pub period: Option<String>,
    pub filter: Option<String>,
}

impl HistoricalQuery {
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, ApiError> {
        Ok(HistoricalQuery {
            period: single_value(pairs, "period")?,
            filter: single_value(pairs, "filter")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct MostActiveQuery {
    pub exchange: Option<String>,
}

impl MostActiveQuery {
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, ApiError> {
        Ok(MostActiveQuery {
            exchange: single_value(pairs, "exchange")?,
        })
    }
}

/// Look-back window accepted by the upstream historical endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    OneMonth,
    SixMonths,
    #[default]
    OneYear,
    ThreeYears,
    FiveYears,
    TenYears,
    Max,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneMonth => "1m",
            Period::SixMonths => "6m",
            Period::OneYear => "1yr",
            Period::ThreeYears => "3yr",
            Period::FiveYears => "5yr",
            Period::TenYears => "10yr",
            Period::Max => "max",
        }
    }
}

impl FromStr for Period {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Period::OneMonth),
            "6m" => Ok(Period::SixMonths),
            "1yr" => Ok(Period::OneYear),
            "3yr" => Ok(Period::ThreeYears),
            "5yr" => Ok(Period::FiveYears),
            "10yr" => Ok(Period::TenYears),
            "max" => Ok(Period::Max),
            other => Err(ApiError::Validation(format!(
                "Invalid period '{}'. Expected one of 1m, 6m, 1yr, 3yr, 5yr, 10yr, max",
                other
            ))),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Series selector for the historical endpoint (price, PE ratio, margins...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoricalFilter {
    #[default]
    Default,
    Price,
    Pe,
    Sm,
    EvEbitda,
    Ptb,
    Mcs,
}

impl HistoricalFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoricalFilter::Default => "default",
            HistoricalFilter::Price => "price",
            HistoricalFilter::Pe => "pe",
            HistoricalFilter::Sm => "sm",
            HistoricalFilter::EvEbitda => "evebitda",
            HistoricalFilter::Ptb => "ptb",
            HistoricalFilter::Mcs => "mcs",
        }
    }
}

impl FromStr for HistoricalFilter {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(HistoricalFilter::Default),
            "price" => Ok(HistoricalFilter::Price),
            "pe" => Ok(HistoricalFilter::Pe),
            "sm" => Ok(HistoricalFilter::Sm),
            "evebitda" => Ok(HistoricalFilter::EvEbitda),
            "ptb" => Ok(HistoricalFilter::Ptb),
            "mcs" => Ok(HistoricalFilter::Mcs),
            other => Err(ApiError::Validation(format!(
                "Invalid filter '{}'. Expected one of default, price, pe, sm, evebitda, ptb, mcs",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Exchange {
    #[default]
    Nse,
    Bse,
}

impl Exchange {
    pub fn most_active_endpoint(&self) -> &'static str {
        match self {
            Exchange::Nse => "/NSE_most_active",
            Exchange::Bse => "/BSE_most_active",
        }
    }
}

impl FromStr for Exchange {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nse" => Ok(Exchange::Nse),
            "bse" => Ok(Exchange::Bse),
            other => Err(ApiError::Validation(format!(
                "Invalid exchange '{}'. Expected nse or bse",
                other
            ))),
        }
    }
}

/// Parses an optional query value, falling back to the type's default when absent or blank.
pub fn parse_or_default<T>(raw: Option<&str>) -> Result<T, ApiError>
where
    T: FromStr<Err = ApiError> + Default,
{
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => value.parse(),
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_parses_case_insensitively() {
        assert_eq!("1YR".parse::<Period>().unwrap(), Period::OneYear);
        assert_eq!(" max ".parse::<Period>().unwrap(), Period::Max);
        assert!("2yr".parse::<Period>().is_err());
    }

    #[test]
    fn missing_or_blank_values_use_defaults() {
        assert_eq!(parse_or_default::<Period>(None).unwrap(), Period::OneYear);
        assert_eq!(
            parse_or_default::<HistoricalFilter>(Some("  ")).unwrap(),
            HistoricalFilter::Default
        );
        assert_eq!(
            parse_or_default::<Exchange>(Some("BSE")).unwrap(),
            Exchange::Bse
        );
    }

    #[test]
    fn invalid_filter_is_a_validation_error() {
        match "volume".parse::<HistoricalFilter>() {
            Err(ApiError::Validation(msg)) => assert!(msg.contains("volume")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn search_query_prefers_q_over_query() {
        let both = SearchQuery {
            q: Some("tata".to_string()),
            query: Some("infy".to_string()),
        };
        assert_eq!(both.text(), "tata");

        let only_query = SearchQuery {
            q: None,
            query: Some("infy".to_string()),
        };
        assert_eq!(only_query.text(), "infy");
        assert_eq!(SearchQuery::default().text(), "");
    }

    fn pairs(raw: &[(&str, &str)]) -> QueryPairs {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn query_pairs_pick_named_values() {
        let search = SearchQuery::from_pairs(&pairs(&[("query", "tcs"), ("x", "1")])).unwrap();
        assert_eq!(search.text(), "tcs");

        let history =
            HistoricalQuery::from_pairs(&pairs(&[("filter", "price"), ("period", "5yr")])).unwrap();
        assert_eq!(history.period.as_deref(), Some("5yr"));
        assert_eq!(history.filter.as_deref(), Some("price"));

        let active = MostActiveQuery::from_pairs(&[]).unwrap();
        assert!(active.exchange.is_none());
    }

    #[test]
    fn repeated_query_parameter_is_rejected() {
        match SearchQuery::from_pairs(&pairs(&[("q", "ab"), ("q", "cd")])) {
            Err(ApiError::Validation(msg)) => assert!(msg.contains("'q'")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(MostActiveQuery::from_pairs(&pairs(&[("exchange", "nse"), ("exchange", "bse")]))
            .is_err());
        assert!(HistoricalQuery::from_pairs(&pairs(&[("period", "1m"), ("period", "6m")])).is_err());
    }

    #[test]
    fn error_envelope_has_no_data() {
        let envelope: Envelope<()> = Envelope::error("boom");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json["data"].is_null());
        assert_eq!(json["message"], "boom");
    }
}
