// This file makes sure every component crate is linked into the binary, so
// their marker registrations land in the inventory. New modules get a line
// here until a build.rs generates it.
#![allow(unused_imports)]

use echo as _;
