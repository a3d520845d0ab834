//! Search coordinator: the single owner of form, request and result state.
//!
//! The coordinator is a synchronous state machine. It never performs I/O
//! itself; [`SearchCoordinator::submit`] hands back a [`Submission`] that the
//! driver executes, and the outcome is fed back through
//! [`SearchCoordinator::settle`] tagged with the submission's [`Ticket`].
//!
//! ```text
//! Idle/Succeeded --submit--> InFlight --timer--> InFlightSlow
//!       ^                        |                     |
//!       +---- settle(outcome) ---+---------------------+
//! ```
//!
//! A failure passes through `Failed` and comes to rest in `Idle` with the
//! notice set, so the user can retry.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{FetchError, Field, UnknownEvent, ValidationError};
use crate::geo::GeoPoint;
use crate::models::SearchResult;
use crate::query::{CatalogRequest, DateBound, DateRules, SearchParameters, build_request};
use crate::selection::SelectionState;

/// Lifecycle of the current search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Idle,
    InFlight,
    /// Still in flight after the slow-load threshold
    InFlightSlow,
    Succeeded,
    Failed,
}

impl RequestStatus {
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::InFlight | Self::InFlightSlow)
    }
}

/// User-facing message raised by a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Any network, server or decode failure
    CommunicationFailure,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommunicationFailure => {
                f.write_str("An error occurred while communicating with USGS.")
            }
        }
    }
}

/// A single edit to the search form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FormEdit {
    Location(Option<GeoPoint>),
    StartDate(Option<DateBound>),
    EndDate(Option<DateBound>),
    MinMagnitude(f64),
    MaxMagnitude(f64),
    RadiusKm(f64),
    ResultLimit(u32),
}

/// Identifies one submission; outcomes for older tickets are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Work handed to the driver on a successful submit.
#[derive(Debug, Clone)]
pub struct Submission {
    pub ticket: Ticket,
    pub request: CatalogRequest,
}

#[derive(Debug)]
struct Pending {
    ticket: Ticket,
    center: GeoPoint,
    /// Result and selection in place before the submit, restored on cancel
    previous: Option<(SearchResult, SelectionState)>,
    /// Notice cleared by the submit, restored on cancel
    notice: Option<Notice>,
}

/// Read-only view of the coordinator published to presentation code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub params: SearchParameters,
    pub validation: Vec<ValidationError>,
    pub invalid_fields: Vec<Field>,
    pub can_submit: bool,
    pub status: RequestStatus,
    pub slow_load: bool,
    pub result: Option<SearchResult>,
    pub selection: SelectionState,
    pub last_searched: Option<GeoPoint>,
    pub notice: Option<String>,
}

/// Owner of the search form and its results.
#[derive(Debug)]
pub struct SearchCoordinator {
    params: SearchParameters,
    rules: DateRules,
    base_url: String,
    validation: Vec<ValidationError>,
    status: RequestStatus,
    result: Option<SearchResult>,
    selection: SelectionState,
    last_searched: Option<GeoPoint>,
    notice: Option<Notice>,
    pending: Option<Pending>,
    next_ticket: u64,
}

impl SearchCoordinator {
    /// Create a coordinator whose requests target `base_url`.
    #[must_use]
    pub fn new(params: SearchParameters, rules: DateRules, base_url: &str, today: NaiveDate) -> Self {
        let validation = params.validate(today, rules);
        Self {
            params,
            rules,
            base_url: base_url.to_string(),
            validation,
            status: RequestStatus::Idle,
            result: None,
            selection: SelectionState::default(),
            last_searched: None,
            notice: None,
            pending: None,
            next_ticket: 0,
        }
    }

    #[must_use]
    pub fn params(&self) -> &SearchParameters {
        &self.params
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation.is_empty()
    }

    /// Whether the search button is enabled.
    #[must_use]
    pub fn can_submit(&self) -> bool {
        self.is_valid() && !self.status.is_in_flight()
    }

    #[must_use]
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    #[must_use]
    pub fn result(&self) -> Option<&SearchResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    /// Center of the last successful search, used for map framing.
    #[must_use]
    pub fn last_searched(&self) -> Option<GeoPoint> {
        self.last_searched
    }

    #[must_use]
    pub fn notice(&self) -> Option<Notice> {
        self.notice
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    /// Apply a form edit and recompute validity.
    pub fn edit(&mut self, edit: FormEdit, today: NaiveDate) {
        debug!(?edit, "form edit");
        match edit {
            FormEdit::Location(p) => self.params.location = p,
            FormEdit::StartDate(d) => self.params.start = d,
            FormEdit::EndDate(d) => self.params.end = d,
            FormEdit::MinMagnitude(v) => self.params.set_min_magnitude(v),
            FormEdit::MaxMagnitude(v) => self.params.set_max_magnitude(v),
            FormEdit::RadiusKm(v) => self.params.set_radius_km(v),
            FormEdit::ResultLimit(v) => self.params.set_result_limit(v),
        }
        self.revalidate(today);
    }

    /// Recompute validity against `today`.
    pub fn revalidate(&mut self, today: NaiveDate) {
        self.validation = self.params.validate(today, self.rules);
    }

    /// Start a search if the form is valid and nothing is in flight.
    ///
    /// Returns `None` (and changes nothing) when either precondition fails.
    pub fn submit(&mut self, today: NaiveDate) -> Option<Submission> {
        if self.status.is_in_flight() {
            debug!("submit ignored: a search is already in flight");
            return None;
        }

        let search = match self.params.resolve(today, self.rules) {
            Ok(search) => search,
            Err(errors) => {
                debug!(?errors, "submit ignored: invalid parameters");
                self.validation = errors;
                return None;
            }
        };
        self.validation.clear();

        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;

        let previous = self
            .result
            .take()
            .map(|r| (r, std::mem::take(&mut self.selection)));
        self.selection = SelectionState::default();
        let notice = self.notice.take();
        self.status = RequestStatus::InFlight;
        self.pending = Some(Pending {
            ticket,
            center: search.center,
            previous,
            notice,
        });

        let request = build_request(&search, &self.base_url);
        info!(ticket = ticket.0, url = %request, "search submitted");

        Some(Submission { ticket, request })
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        self.pending.as_ref().is_some_and(|p| p.ticket == ticket)
    }

    /// Enter the slow sub-state if `ticket` is still in flight.
    ///
    /// Returns whether the state changed.
    pub fn mark_slow(&mut self, ticket: Ticket) -> bool {
        if !self.is_current(ticket) || self.status != RequestStatus::InFlight {
            return false;
        }
        info!(ticket = ticket.0, "search is taking a while");
        self.status = RequestStatus::InFlightSlow;
        true
    }

    /// Apply the outcome of the request identified by `ticket`.
    ///
    /// Returns the notice raised, if any. Outcomes for stale tickets are
    /// dropped.
    pub fn settle(
        &mut self,
        ticket: Ticket,
        outcome: Result<SearchResult, FetchError>,
    ) -> Option<Notice> {
        if !self.is_current(ticket) {
            debug!(ticket = ticket.0, "dropping outcome of a stale search");
            return None;
        }
        let pending = self.pending.take()?;

        match outcome {
            Ok(result) => {
                info!(ticket = ticket.0, events = result.len(), "search succeeded");
                self.last_searched = Some(pending.center);
                self.selection = SelectionState::for_result(&result);
                self.result = Some(result);
                self.finish(RequestStatus::Succeeded);
                None
            }
            Err(e) if e.is_cancelled() => {
                debug!(ticket = ticket.0, "search cancelled");
                if let Some((result, selection)) = pending.previous {
                    self.result = Some(result);
                    self.selection = selection;
                }
                self.notice = pending.notice;
                self.finish(RequestStatus::Idle);
                None
            }
            Err(e) => {
                warn!(ticket = ticket.0, "search failed: {e}");
                self.result = None;
                self.selection = SelectionState::default();
                self.notice = Some(Notice::CommunicationFailure);
                self.finish(RequestStatus::Failed);
                self.notice
            }
        }
    }

    /// Leave the in-flight state. `Failed` is terminal but not resting.
    fn finish(&mut self, terminal: RequestStatus) {
        debug!(?terminal, "search settled");
        self.status = match terminal {
            RequestStatus::Failed => RequestStatus::Idle,
            other => other,
        };
    }

    /// Flip the highlight flag of one event.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEvent`] if the id is not in the current result.
    pub fn toggle_selection(&mut self, id: &str) -> Result<bool, UnknownEvent> {
        self.selection.toggle(id)
    }

    /// Ticket of the request currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> Option<Ticket> {
        self.pending.as_ref().map(|p| p.ticket)
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let mut invalid_fields: Vec<Field> = Vec::new();
        for field in self.validation.iter().flat_map(ValidationError::fields) {
            if !invalid_fields.contains(field) {
                invalid_fields.push(*field);
            }
        }

        Snapshot {
            params: self.params().clone(),
            validation: self.validation.clone(),
            invalid_fields,
            can_submit: self.can_submit(),
            status: self.status(),
            slow_load: self.status() == RequestStatus::InFlightSlow,
            result: self.result().cloned(),
            selection: self.selection().clone(),
            last_searched: self.last_searched(),
            notice: self.notice().map(|n| n.to_string()),
        }
    }
}
