use std::sync::Arc;

use lp_crawler::CrawlService;

pub struct AppState {
    pub service: Arc<dyn CrawlService>,
}
