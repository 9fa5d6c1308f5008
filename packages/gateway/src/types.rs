// ABOUTME: Region and bundle catalogs for stack provisioning
// ABOUTME: Enumerates the supported provider regions and instance size bundles

use serde::{Deserialize, Serialize};

/// Supported provider regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "us-east-1")]
    UsEast1,
    #[serde(rename = "us-east-2")]
    UsEast2,
    #[serde(rename = "us-west-1")]
    UsWest1,
    #[serde(rename = "us-west-2")]
    UsWest2,
    #[serde(rename = "ap-south-1")]
    ApSouth1,
    #[serde(rename = "ap-southeast-1")]
    ApSoutheast1,
    #[serde(rename = "ap-southeast-2")]
    ApSoutheast2,
    #[serde(rename = "eu-central-1")]
    EuCentral1,
    #[serde(rename = "eu-west-1")]
    EuWest1,
    #[serde(rename = "eu-west-2")]
    EuWest2,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsEast1 => "us-east-1",
            Self::UsEast2 => "us-east-2",
            Self::UsWest1 => "us-west-1",
            Self::UsWest2 => "us-west-2",
            Self::ApSouth1 => "ap-south-1",
            Self::ApSoutheast1 => "ap-southeast-1",
            Self::ApSoutheast2 => "ap-southeast-2",
            Self::EuCentral1 => "eu-central-1",
            Self::EuWest1 => "eu-west-1",
            Self::EuWest2 => "eu-west-2",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|r| r.as_str() == s)
    }

    pub fn all() -> &'static [Region] {
        &[
            Self::UsEast1,
            Self::UsEast2,
            Self::UsWest1,
            Self::UsWest2,
            Self::ApSouth1,
            Self::ApSoutheast1,
            Self::ApSoutheast2,
            Self::EuCentral1,
            Self::EuWest1,
            Self::EuWest2,
        ]
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance size bundles offered for sandbox stacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bundle {
    #[serde(rename = "nano_3_0")]
    Nano,
    #[serde(rename = "micro_3_0")]
    Micro,
    #[serde(rename = "small_3_0")]
    Small,
    #[serde(rename = "medium_3_0")]
    Medium,
    #[serde(rename = "large_3_0")]
    Large,
}

impl Bundle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nano => "nano_3_0",
            Self::Micro => "micro_3_0",
            Self::Small => "small_3_0",
            Self::Medium => "medium_3_0",
            Self::Large => "large_3_0",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|b| b.as_str() == s)
    }

    pub fn all() -> &'static [Bundle] {
        &[Self::Nano, Self::Micro, Self::Small, Self::Medium, Self::Large]
    }

    /// Memory included in the bundle, in megabytes
    pub fn memory_mb(&self) -> u64 {
        match self {
            Self::Nano => 512,
            Self::Micro => 1024,
            Self::Small => 2048,
            Self::Medium => 4096,
            Self::Large => 8192,
        }
    }

    /// Virtual CPUs included in the bundle
    pub fn vcpus(&self) -> u32 {
        match self {
            Self::Nano | Self::Micro | Self::Small => 1,
            Self::Medium | Self::Large => 2,
        }
    }
}

impl std::fmt::Display for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_round_trips_through_str() {
        for region in Region::all() {
            assert_eq!(Region::from_str(region.as_str()), Some(*region));
        }
        assert_eq!(Region::from_str("mars-north-1"), None);
    }

    #[test]
    fn bundle_catalog_is_consistent() {
        for bundle in Bundle::all() {
            assert_eq!(Bundle::from_str(bundle.as_str()), Some(*bundle));
            assert!(bundle.memory_mb() >= 512);
            assert!(bundle.vcpus() >= 1);
        }
    }

    #[test]
    fn region_serde_uses_wire_names() {
        let json = serde_json::to_string(&Region::ApSoutheast1).unwrap();
        assert_eq!(json, "\"ap-southeast-1\"");
        let bundle: Bundle = serde_json::from_str("\"nano_3_0\"").unwrap();
        assert_eq!(bundle, Bundle::Nano);
    }
}
