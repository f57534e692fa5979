//! Types of the `faultline.v1.RuleDistribution` gRPC service
//!
//! Generated from `proto/faultline.proto` by the build script, plus the
//! conversions the engine needs on top.

use crate::policy::WireFormat;

tonic::include_proto!("faultline.v1");

impl From<PayloadFormat> for WireFormat {
    fn from(format: PayloadFormat) -> Self {
        match format {
            PayloadFormat::Json => WireFormat::Json,
            PayloadFormat::Yaml => WireFormat::Yaml,
        }
    }
}

impl RuleSetUpdate {
    /// Declared payload encoding; unknown values fall back to sniffing.
    pub fn wire_format(&self) -> WireFormat {
        PayloadFormat::try_from(self.format)
            .map(WireFormat::from)
            .unwrap_or_else(|_| WireFormat::detect(&self.payload))
    }
}
