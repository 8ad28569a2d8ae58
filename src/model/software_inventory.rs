use std::fmt;

use serde::{Deserialize, Serialize};

/// https://redfish.dmtf.org/schemas/v1/SoftwareInventory.v1_10_0.json
/// One entry of UpdateService/FirmwareInventory
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct SoftwareInventory {
    #[serde(rename = "@odata.id", default)]
    pub odata_id: String,
    #[serde(default)]
    pub id: String,
    pub version: Option<String>,
}

/// Firmware components of a BlueField DPU as the BMC inventories them.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    BMC,
    CEC,
    ATF,
    UEFI,
    BSP,
    NIC,
    NODE,
    OFED,
    OS,
    SysImage,
    ConfImage,
    Board,
}

impl Component {
    pub const ALL: [Component; 12] = [
        Component::BMC,
        Component::CEC,
        Component::ATF,
        Component::UEFI,
        Component::BSP,
        Component::NIC,
        Component::NODE,
        Component::OFED,
        Component::OS,
        Component::SysImage,
        Component::ConfImage,
        Component::Board,
    ];

    /// The FirmwareInventory member id
    pub fn resource(&self) -> &'static str {
        match self {
            Component::BMC => "BMC_Firmware",
            Component::CEC => "Bluefield_FW_ERoT",
            Component::ATF => "DPU_ATF",
            Component::UEFI => "DPU_UEFI",
            Component::BSP => "DPU_BSP",
            Component::NIC => "DPU_NIC",
            Component::NODE => "DPU_NODE",
            Component::OFED => "DPU_OFED",
            Component::OS => "DPU_OS",
            Component::SysImage => "DPU_SYS_IMAGE",
            Component::ConfImage => "golden_image_config",
            Component::Board => "DPU_BOARD",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Component::BMC => "BMC",
            Component::CEC => "CEC",
            Component::ATF => "ATF",
            Component::UEFI => "UEFI",
            Component::BSP => "BSP",
            Component::NIC => "NIC",
            Component::NODE => "NODE",
            Component::OFED => "OFED",
            Component::OS => "OS",
            Component::SysImage => "SYS_IMAGE",
            Component::ConfImage => "CONF_IMAGE",
            Component::Board => "BOARD",
        }
    }

    pub fn from_resource(resource: &str) -> Option<Component> {
        Component::ALL.into_iter().find(|c| c.resource() == resource)
    }

    pub fn from_name(name: &str) -> Option<Component> {
        Component::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Display name for an inventory member id. Unknown ids are shown as-is.
    pub fn display_name(resource: &str) -> String {
        Component::from_resource(resource)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| resource.to_string())
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_table() {
        assert_eq!(Component::from_resource("Bluefield_FW_ERoT"), Some(Component::CEC));
        assert_eq!(Component::from_name("CONF_IMAGE"), Some(Component::ConfImage));
        assert_eq!(Component::display_name("DPU_BOARD"), "BOARD");
        assert_eq!(Component::display_name("Some_Other_FW"), "Some_Other_FW");
        for c in Component::ALL {
            assert_eq!(Component::from_resource(c.resource()), Some(c));
        }
    }

    #[test]
    fn test_inventory_parse() {
        let data = r#"{
            "@odata.id": "/redfish/v1/UpdateService/FirmwareInventory/DPU_ATF",
            "Id": "DPU_ATF",
            "Name": "Software Inventory",
            "Version": "4.9.0-25-g1ea8a8b"
        }"#;
        let inv: SoftwareInventory = serde_json::from_str(data).unwrap();
        assert_eq!(inv.version.as_deref(), Some("4.9.0-25-g1ea8a8b"));
    }
}
