//! Ad detection over the player container's class list.

use std::sync::Arc;

use page_adapter::{PagePort, PortError};

/// One reading of the ad signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdSignal {
    /// Player container exists in the document.
    pub player_present: bool,
    /// An ad marker class is on the container.
    pub ad_showing: bool,
}

impl AdSignal {
    pub const ABSENT: AdSignal = AdSignal {
        player_present: false,
        ad_showing: false,
    };
}

/// Samples the player container's class tokens and matches them against the
/// configured ad markers. A missing container reads as "no ad" rather than
/// an error; only a failed conversation with the page is an error.
pub struct AdSignalProbe {
    page: Arc<dyn PagePort>,
    markers: Vec<String>,
}

impl AdSignalProbe {
    pub fn new(page: Arc<dyn PagePort>, markers: Vec<String>) -> Self {
        Self { page, markers }
    }

    pub async fn sample(&self) -> Result<AdSignal, PortError> {
        let classes = match self.page.player_classes().await? {
            Some(classes) => classes,
            None => return Ok(AdSignal::ABSENT),
        };

        // Whole-token match, the way classList.contains sees it. A class
        // like "ad-showing-banner" must not trip the signal.
        let ad_showing = classes
            .split_whitespace()
            .any(|token| self.markers.iter().any(|marker| marker == token));

        Ok(AdSignal {
            player_present: true,
            ad_showing,
        })
    }
}
