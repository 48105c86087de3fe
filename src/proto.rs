//! Generated gRPC bindings
//!
//! Conversions between the wire messages and the domain types live here so
//! services stay free of prost field juggling.

use crate::domain;

pub mod lvmd {
    tonic::include_proto!("lvmd");
}

pub mod csi {
    tonic::include_proto!("csi.v1");
}

impl From<&domain::LogicalVolume> for lvmd::LogicalVolume {
    fn from(lv: &domain::LogicalVolume) -> Self {
        Self {
            name: lv.name.clone(),
            size_bytes: lv.size_bytes,
            tags: lv.tags.clone(),
            path: lv.path.clone(),
            attr: lv.attr.clone(),
        }
    }
}

impl From<lvmd::LogicalVolume> for domain::LogicalVolume {
    fn from(lv: lvmd::LogicalVolume) -> Self {
        // The wire message carries the node-relevant subset; allocation
        // details stay daemon-side.
        Self {
            name: lv.name,
            vg_name: String::new(),
            path: lv.path,
            size_bytes: lv.size_bytes,
            tags: lv.tags,
            attr: lv.attr,
            origin: None,
            pool: None,
        }
    }
}
