// src/api.rs
use crate::config::Environment;
use crate::error::ApiError;
use crate::models::{
    parse_or_default, Envelope, Exchange, HealthReport, HistoricalFilter, HistoricalQuery,
    MostActiveQuery, Period, QueryPairs, SearchQuery,
};
use crate::service::StockService;
use chrono::Utc;
use log::{error, info};
use percent_encoding::percent_decode_str;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppContext {
    pub service: Arc<StockService>,
    pub started_at: Instant,
    pub environment: Environment,
}

impl AppContext {
    fn expose_details(&self) -> bool {
        self.environment == Environment::Development
    }

    fn respond(&self, result: Result<Value, ApiError>, message: &str) -> Response {
        match result {
            Ok(data) => {
                info!("{} succeeded.", message);
                warp::reply::with_status(
                    warp::reply::json(&Envelope::success(data, message)),
                    StatusCode::OK,
                )
                .into_response()
            }
            Err(e) => {
                error!("{} failed: {}", message, e);
                e.into_reply(self.expose_details())
            }
        }
    }
}

// Handlers never reject: a rejection would let `or` fall through to the
// `/api/stocks/{symbol}` route and fetch e.g. "top-gainers" as a symbol.
// Query strings are taken as raw pairs, which cannot fail to deserialize, and
// validated inside the handlers.
pub fn routes(ctx: AppContext) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let health = warp::path!("api" / "health")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(health_handler);

    let list = warp::path!("api" / "stocks")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(list_stocks_handler);

    let search = warp::path!("api" / "stocks" / "search")
        .and(warp::get())
        .and(warp::query::<QueryPairs>())
        .and(with_context(ctx.clone()))
        .and_then(search_handler);

    let gainers = warp::path!("api" / "stocks" / "top-gainers")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(top_gainers_handler);

    let losers = warp::path!("api" / "stocks" / "top-losers")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(top_losers_handler);

    let indices = warp::path!("api" / "stocks" / "market-indices")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(market_indices_handler);

    let week_52 = warp::path!("api" / "stocks" / "52-week")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(week_52_handler);

    let most_active = warp::path!("api" / "stocks" / "most-active")
        .and(warp::get())
        .and(warp::query::<QueryPairs>())
        .and(with_context(ctx.clone()))
        .and_then(most_active_handler);

    let shockers = warp::path!("api" / "stocks" / "price-shockers")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(price_shockers_handler);

    let stock = warp::path!("api" / "stocks" / String)
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(stock_handler);

    let historical = warp::path!("api" / "stocks" / String / "historical")
        .and(warp::get())
        .and(warp::query::<QueryPairs>())
        .and(with_context(ctx.clone()))
        .and_then(historical_handler);

    let ipo = warp::path!("api" / "ipo")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(ipo_handler);

    let news = warp::path!("api" / "news")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(news_handler);

    let clear_cache = warp::path!("api" / "cache")
        .and(warp::delete())
        .and(with_context(ctx))
        .and_then(clear_cache_handler);

    health
        .or(list)
        .or(search)
        .or(gainers)
        .or(losers)
        .or(indices)
        .or(week_52)
        .or(most_active)
        .or(shockers)
        .or(stock)
        .or(historical)
        .or(ipo)
        .or(news)
        .or(clear_cache)
}

fn with_context(
    ctx: AppContext,
) -> impl Filter<Extract = (AppContext,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

// warp hands path segments over still percent-encoded.
fn decode_segment(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

async fn health_handler(ctx: AppContext) -> Result<impl Reply, Rejection> {
    let report = HealthReport {
        uptime_secs: ctx.started_at.elapsed().as_secs(),
        timestamp: Utc::now().to_rfc3339(),
        environment: ctx.environment.as_str().to_string(),
        cache: ctx.service.cache().stats(),
    };
    Ok(warp::reply::json(&Envelope::success(report, "Server is healthy")))
}

async fn list_stocks_handler(ctx: AppContext) -> Result<impl Reply, Rejection> {
    let result = ctx.service.list_stocks().await;
    Ok(ctx.respond(result, "Stock list retrieval"))
}

async fn search_handler(pairs: QueryPairs, ctx: AppContext) -> Result<impl Reply, Rejection> {
    let result = match SearchQuery::from_pairs(&pairs) {
        Ok(query) => ctx.service.search(query.text()).await,
        Err(e) => Err(e),
    };
    Ok(ctx.respond(result, "Stock search"))
}

async fn top_gainers_handler(ctx: AppContext) -> Result<impl Reply, Rejection> {
    let result = ctx.service.top_gainers().await;
    Ok(ctx.respond(result, "Top gainers retrieval"))
}

async fn top_losers_handler(ctx: AppContext) -> Result<impl Reply, Rejection> {
    let result = ctx.service.top_losers().await;
    Ok(ctx.respond(result, "Top losers retrieval"))
}

async fn market_indices_handler(ctx: AppContext) -> Result<impl Reply, Rejection> {
    let result = ctx.service.market_indices().await;
    Ok(ctx.respond(result, "Market indices retrieval"))
}

async fn week_52_handler(ctx: AppContext) -> Result<impl Reply, Rejection> {
    let result = ctx.service.week_52().await;
    Ok(ctx.respond(result, "52-week high/low retrieval"))
}

async fn most_active_handler(
    pairs: QueryPairs,
    ctx: AppContext,
) -> Result<impl Reply, Rejection> {
    let exchange = MostActiveQuery::from_pairs(&pairs)
        .and_then(|query| parse_or_default::<Exchange>(query.exchange.as_deref()));
    let result = match exchange {
        Ok(exchange) => ctx.service.most_active(exchange).await,
        Err(e) => Err(e),
    };
    Ok(ctx.respond(result, "Most active stocks retrieval"))
}

async fn price_shockers_handler(ctx: AppContext) -> Result<impl Reply, Rejection> {
    let result = ctx.service.price_shockers().await;
    Ok(ctx.respond(result, "Price shockers retrieval"))
}

async fn stock_handler(symbol: String, ctx: AppContext) -> Result<impl Reply, Rejection> {
    let symbol = decode_segment(&symbol);
    let result = ctx.service.stock(&symbol).await;
    Ok(ctx.respond(result, &format!("Stock {} retrieval", symbol.trim())))
}

async fn historical_handler(
    symbol: String,
    pairs: QueryPairs,
    ctx: AppContext,
) -> Result<impl Reply, Rejection> {
    let symbol = decode_segment(&symbol);
    let options = HistoricalQuery::from_pairs(&pairs).and_then(|query| {
        let period = parse_or_default::<Period>(query.period.as_deref())?;
        let filter = parse_or_default::<HistoricalFilter>(query.filter.as_deref())?;
        Ok((period, filter))
    });

    let result = match options {
        Ok((period, filter)) => ctx.service.historical(&symbol, period, filter).await,
        Err(e) => Err(e),
    };
    Ok(ctx.respond(
        result,
        &format!("Historical data for {} retrieval", symbol.trim()),
    ))
}

async fn ipo_handler(ctx: AppContext) -> Result<impl Reply, Rejection> {
    let result = ctx.service.ipo().await;
    Ok(ctx.respond(result, "IPO data retrieval"))
}

async fn news_handler(ctx: AppContext) -> Result<impl Reply, Rejection> {
    let result = ctx.service.news().await;
    Ok(ctx.respond(result, "News retrieval"))
}

async fn clear_cache_handler(ctx: AppContext) -> Result<impl Reply, Rejection> {
    let cleared = ctx.service.cache().clear().await;
    info!("Cache cleared ({} entries).", cleared);
    Ok(warp::reply::json(&Envelope::success(
        json!({ "cleared": cleared }),
        "Cache cleared",
    )))
}
