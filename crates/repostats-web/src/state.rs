//! Shared application state.

use std::sync::Arc;

use repostats_core::bots::BotFilter;
use repostats_core::event::EventService;
use repostats_core::stats::StatsService;

pub(crate) struct WebApp {
    pub(crate) events: EventService,
    pub(crate) stats: StatsService,
    pub(crate) bots: BotFilter,
}

pub(crate) type SharedState = Arc<WebApp>;
