//! Task types served by the worker

use std::sync::Arc;
use std::time::Duration;

use gear::prelude::*;
use gear::engine::TaskType;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::WorkerConfig;

pub const ECHO: &str = "echo";
pub const PAGE: &str = "page";
pub const PROXY: &str = "proxy";

const PAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Logs its text and re-submits itself while `remaining` is above zero
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoInput {
    pub text: String,
    #[serde(default)]
    pub remaining: u32,
}

pub struct Echo {
    input: EchoInput,
}

#[async_trait]
impl Task for Echo {
    async fn handle(&mut self, ctx: &TaskContext) -> Result<bool, TaskError> {
        info!(run_id = %ctx.run_id(), text = %self.input.text, remaining = self.input.remaining, "echo");
        Ok(true)
    }

    async fn success(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        if self.input.remaining > 0 {
            let next = EchoInput {
                text: self.input.text.clone(),
                remaining: self.input.remaining - 1,
            };
            ctx.submit(ECHO, serde_json::to_value(next)?).await?;
        }
        Ok(())
    }
}

/// A page to download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInput {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
}

/// Downloads a page through the proxy pool when it has endpoints
pub struct Page {
    input: PageInput,
    pool: Arc<ProxyPool>,
    fetcher: HttpFetcher,
    request: Option<HttpRequest>,
    result: Option<FetchResult>,
}

impl Page {
    pub fn new(input: PageInput, pool: Arc<ProxyPool>, fetcher: HttpFetcher) -> Self {
        Self {
            input,
            pool,
            fetcher,
            request: None,
            result: None,
        }
    }

    fn proxy(&self) -> Option<&str> {
        self.request.as_ref().and_then(|r| r.proxy.as_deref())
    }
}

#[async_trait]
impl Task for Page {
    async fn before(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        let mut request = HttpRequest::new(self.input.method, self.input.url.clone())
            .with_header("accept", "text/html,*/*;q=0.8");
        if !self.pool.is_empty() {
            request = request.with_proxy(self.pool.get().await);
        }
        self.request = Some(request);
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        Some(PAGE_TIMEOUT)
    }

    async fn fetch(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        let Some(request) = &self.request else {
            return Err(TaskError::new("request not prepared"));
        };
        self.result = Some(self.fetcher.fetch(request).await?);
        Ok(())
    }

    async fn check(&mut self, _ctx: &TaskContext) -> Result<bool, TaskError> {
        Ok(self.result.as_ref().is_some_and(FetchResult::is_success))
    }

    async fn handle(&mut self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let Some(result) = &self.result else {
            return Ok(false);
        };
        info!(
            run_id = %ctx.run_id(),
            url = %self.input.url,
            status = result.status,
            bytes = result.body.len(),
            proxy = ?self.proxy(),
            "Page downloaded"
        );
        Ok(true)
    }

    async fn success(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        if let Some(proxy) = self.proxy() {
            self.pool.feedback(proxy);
        }
        Ok(())
    }

    async fn failure(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        warn!(
            run_id = %ctx.run_id(),
            url = %self.input.url,
            status = ?self.result.as_ref().map(|r| r.status),
            proxy = ?self.proxy(),
            "Page failed, will be redelivered"
        );
        Ok(())
    }
}

/// Location of a proxy list: a JSON array of `[ip, port, priority]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyFeedInput {
    pub url: String,
}

/// Polls a proxy list into the pool, then re-submits itself after `refresh`
///
/// Known endpoints are re-announced on every poll, which tops up their
/// credits by their priority.
pub struct ProxyFeed {
    input: ProxyFeedInput,
    pool: Arc<ProxyPool>,
    fetcher: HttpFetcher,
    refresh: Duration,
    result: Option<FetchResult>,
}

impl ProxyFeed {
    pub fn new(
        input: ProxyFeedInput,
        pool: Arc<ProxyPool>,
        fetcher: HttpFetcher,
        refresh: Duration,
    ) -> Self {
        Self {
            input,
            pool,
            fetcher,
            refresh,
            result: None,
        }
    }
}

#[async_trait]
impl Task for ProxyFeed {
    fn timeout(&self) -> Option<Duration> {
        Some(PAGE_TIMEOUT)
    }

    async fn fetch(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        let request = HttpRequest::get(self.input.url.clone());
        self.result = Some(self.fetcher.fetch(&request).await?);
        Ok(())
    }

    async fn check(&mut self, _ctx: &TaskContext) -> Result<bool, TaskError> {
        Ok(self.result.as_ref().is_some_and(FetchResult::is_success))
    }

    async fn handle(&mut self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let Some(result) = &self.result else {
            return Ok(false);
        };
        let entries: Vec<(String, u16, i64)> = result.json()?;
        for (ip, port, priority) in &entries {
            self.pool.add(ip, *port, *priority);
        }
        info!(run_id = %ctx.run_id(), added = entries.len(), pool = self.pool.len(), "Proxy pool refreshed");
        Ok(true)
    }

    async fn success(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        tokio::time::sleep(self.refresh).await;
        ctx.submit(PROXY, serde_json::to_value(&self.input)?).await?;
        Ok(())
    }

    async fn failure(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        warn!(run_id = %ctx.run_id(), url = %self.input.url, "Proxy feed unavailable, will be redelivered");
        // Keeps a dead feed from being polled in a tight loop
        tokio::time::sleep(self.refresh).await;
        Ok(())
    }
}

/// Register the echo, page and proxy task types
pub fn register(
    manager: &Manager,
    config: &WorkerConfig,
    pool: Arc<ProxyPool>,
    fetcher: HttpFetcher,
) -> Result<Vec<Arc<TaskType>>, ManagerError> {
    let echo = manager.register(
        ECHO,
        typed_factory(|input: EchoInput| Echo { input }),
        config.echo_concurrency,
    )?;

    let page = {
        let (pool, fetcher) = (Arc::clone(&pool), fetcher.clone());
        manager.register(
            PAGE,
            typed_factory(move |input: PageInput| {
                Page::new(input, Arc::clone(&pool), fetcher.clone())
            }),
            config.page_concurrency,
        )?
    };

    let refresh = config.proxy_refresh;
    let proxy = manager.register(
        PROXY,
        typed_factory(move |input: ProxyFeedInput| {
            ProxyFeed::new(input, Arc::clone(&pool), fetcher.clone(), refresh)
        }),
        1,
    )?;

    Ok(vec![echo, page, proxy])
}
