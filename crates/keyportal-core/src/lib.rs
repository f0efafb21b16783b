//! Core library for `keyportal`.
//!
//! Tracks who is signed in, whether that account has been issued its single
//! API key, and issues or revokes that key. The "has a key" flag lives in two
//! places: a remote record store that is the source of truth but may be
//! unreachable, and a local cache that is always reachable. The
//! [`entitlement`] reconciler keeps them aligned and reports a `degraded`
//! flag instead of failing when the remote side is down.
//!
//! Layering, leaf first:
//!
//! 1. [`session`]: current principal as a watchable state
//! 2. [`entitlement`]: reconciles the flag across the record store and cache
//! 3. [`issuance`]: calls the key generator, enforces one key per account
//!
//! [`portal::Portal`] composes the three for a single process. Remote
//! collaborators are traits ([`identity::IdentityProvider`],
//! [`records::RecordStore`], [`issuance::KeyGenerator`]) with in-memory and
//! HTTP implementations.

pub mod cache;
pub mod entitlement;
pub mod error;
pub mod firebase;
pub mod identity;
pub mod issuance;
pub mod keygen;
pub mod portal;
pub mod principal;
pub mod records;
pub mod session;
