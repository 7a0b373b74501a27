#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Authenticated pagination and table extraction for members-only listing
//! portals.
//!
//! A run logs in once ([`auth`]), then for each listing page drives the
//! browser there and waits for the client-side render ([`navigator`]),
//! picks the product table among the page's tables ([`locator`]), and
//! turns its rows into records ([`extract`]). The [`controller`] ties the
//! stages together and applies the retry and stop policy; [`cleanup`]
//! tidies the result afterwards.
//!
//! Everything goes through an explicitly passed [`Browser`] handle, so the
//! pipeline runs the same against a real browser and against fixture pages.
//!
//! Error taxonomy:
//!
//! * [`AuthError`] is fatal.
//! * [`PageError::SessionExpired`] is recovered once by logging in again.
//! * [`PageError::Navigation`] is retried, then the page is skipped.
//! * A page without a qualifying table is not an error; the locator
//!   returns `None` and the page counts as empty.

pub mod auth;
pub mod browser;
pub mod cleanup;
pub mod controller;
pub mod extract;
pub mod html_table;
pub mod locator;
pub mod navigator;
pub mod progress;
pub mod site;

#[cfg(test)]
mod testing;

pub use auth::{AuthError, Authenticator};
pub use browser::{Browser, BrowserError, FormSubmission};
pub use controller::PaginationController;
pub use locator::{KeywordTablePolicy, TableSelectionPolicy};
pub use navigator::{Navigator, PageError};
pub use progress::{NullProgress, ProgressCallback, null_progress};
pub use site::{ConfigError, Credentials, SiteDefinition};
