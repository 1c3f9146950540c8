//! Data sources for the dashboard.
//!
//! The loader and the selection cascade only ever talk to a [`FeedGateway`]; the
//! live Bitbucket client and the offline simulation are interchangeable behind it.

pub mod http;
pub mod parser;
pub mod simulated;

use crate::error::Result;
use crate::model::{Page, Run, RunKind, Step};
use async_trait::async_trait;

pub use http::{BitbucketGateway, Credentials};
pub use simulated::SimulatedGateway;

#[async_trait]
pub trait FeedGateway: Send + Sync {
    /// One page of a feed. `query` is either [`crate::pagination::first_page_query`]
    /// or the query of a previously returned next-page cursor.
    async fn fetch_page(&self, feed: RunKind, query: &str) -> Result<Page>;

    async fn fetch_steps(&self, run: &Run) -> Result<Vec<Step>>;

    async fn fetch_step_detail(&self, run: &Run, step_id: &str) -> Result<Step>;

    async fn fetch_step_log(&self, run: &Run, step_id: &str) -> Result<String>;
}
