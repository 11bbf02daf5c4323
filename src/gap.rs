//! Generic Access Profile: UUIDs and advertising data ([Vol 3] Part C).

pub use {adv::*, uuid::*};

mod adv;
mod uuid;
