use crate::feeds::{Feed, FeedGroup, FeedKind};
use crate::poll::PollResult;

/// One dashboard panel: a feed's identity plus its latest state.
#[derive(Debug, Clone)]
pub struct Panel {
    pub title: String,
    pub kind: FeedKind,
    pub result: PollResult,
}

impl Panel {
    pub fn new(feed: &Feed) -> Self {
        Self {
            title: feed.title.clone(),
            kind: feed.kind.clone(),
            result: PollResult::Loading,
        }
    }
}

/// A state change for the panel at index `panel`, sent by its poller.
#[derive(Debug, Clone)]
pub struct FeedUpdate {
    pub panel: usize,
    pub result: PollResult,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub ready: usize,
    pub failed: usize,
    pub loading: usize,
}

pub struct App {
    pub panels: Vec<Panel>,
    /// Focused panel, if any.
    pub selected: Option<usize>,
    /// Whether the user has requested to quit.
    pub quit: bool,
    /// Last poll status message.
    pub status: String,
}

impl App {
    pub fn new(panels: Vec<Panel>) -> Self {
        Self {
            panels,
            selected: None,
            quit: false,
            status: "Starting…".into(),
        }
    }

    /// Replace a panel's state with the newest resolved result.
    pub fn apply(&mut self, update: FeedUpdate) {
        let Some(panel) = self.panels.get_mut(update.panel) else {
            return;
        };

        match &update.result {
            PollResult::Ready { .. } => self.status = format!("Updated {}", panel.title),
            PollResult::Failed(e) => self.status = format!("{}: {e}", panel.title),
            PollResult::Loading => {}
        }
        panel.result = update.result;
    }

    /// Panel indices in `group`, in display order.
    pub fn group(&self, group: FeedGroup) -> Vec<usize> {
        self.panels
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind.group() == group)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn tally(&self) -> Tally {
        self.panels
            .iter()
            .fold(Tally::default(), |mut t, p| {
                match p.result {
                    PollResult::Ready { .. } => t.ready += 1,
                    PollResult::Failed(_) => t.failed += 1,
                    PollResult::Loading => t.loading += 1,
                }
                t
            })
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selected == Some(index)
    }

    // -- navigation ----------------------------------------------------------

    pub fn select_next(&mut self) {
        if self.panels.is_empty() {
            return;
        }
        let i = match self.selected {
            Some(i) => (i + 1).min(self.panels.len() - 1),
            None => 0,
        };
        self.selected = Some(i);
    }

    pub fn select_previous(&mut self) {
        if self.panels.is_empty() {
            return;
        }
        let i = match self.selected {
            Some(i) => i.saturating_sub(1),
            None => 0,
        };
        self.selected = Some(i);
    }

    pub fn select_first(&mut self) {
        if !self.panels.is_empty() {
            self.selected = Some(0);
        }
    }

    pub fn select_last(&mut self) {
        if !self.panels.is_empty() {
            self.selected = Some(self.panels.len() - 1);
        }
    }
}
