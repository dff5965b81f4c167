use crate::{ModelDefinition, PointDefinition, PointType, ScaleFactor};

use crate::PointType::String as Str;
use crate::PointType::{
    Acc32, Acc64, Bitfield16, Bitfield32, Count, Enum16, Int16, Pad, Sunssf, Uint16, Uint32,
};

type PointSpec = (&'static str, PointType, u16, Option<&'static str>);

const COMMON: &[PointSpec] = &[
    ("Mn", Str, 16, None),
    ("Md", Str, 16, None),
    ("Opt", Str, 8, None),
    ("Vr", Str, 8, None),
    ("SN", Str, 16, None),
    ("DA", Uint16, 1, None),
    ("Pad", Pad, 1, None),
];

const INVERTER: &[PointSpec] = &[
    ("A", Uint16, 1, Some("A_SF")),
    ("AphA", Uint16, 1, Some("A_SF")),
    ("AphB", Uint16, 1, Some("A_SF")),
    ("AphC", Uint16, 1, Some("A_SF")),
    ("A_SF", Sunssf, 1, None),
    ("PPVphAB", Uint16, 1, Some("V_SF")),
    ("PPVphBC", Uint16, 1, Some("V_SF")),
    ("PPVphCA", Uint16, 1, Some("V_SF")),
    ("PhVphA", Uint16, 1, Some("V_SF")),
    ("PhVphB", Uint16, 1, Some("V_SF")),
    ("PhVphC", Uint16, 1, Some("V_SF")),
    ("V_SF", Sunssf, 1, None),
    ("W", Int16, 1, Some("W_SF")),
    ("W_SF", Sunssf, 1, None),
    ("Hz", Uint16, 1, Some("Hz_SF")),
    ("Hz_SF", Sunssf, 1, None),
    ("VA", Int16, 1, Some("VA_SF")),
    ("VA_SF", Sunssf, 1, None),
    ("VAr", Int16, 1, Some("VAr_SF")),
    ("VAr_SF", Sunssf, 1, None),
    ("PF", Int16, 1, Some("PF_SF")),
    ("PF_SF", Sunssf, 1, None),
    ("WH", Acc32, 2, Some("WH_SF")),
    ("WH_SF", Sunssf, 1, None),
    ("DCA", Uint16, 1, Some("DCA_SF")),
    ("DCA_SF", Sunssf, 1, None),
    ("DCV", Uint16, 1, Some("DCV_SF")),
    ("DCV_SF", Sunssf, 1, None),
    ("DCW", Int16, 1, Some("DCW_SF")),
    ("DCW_SF", Sunssf, 1, None),
    ("TmpCab", Int16, 1, Some("Tmp_SF")),
    ("TmpSnk", Int16, 1, Some("Tmp_SF")),
    ("TmpTrns", Int16, 1, Some("Tmp_SF")),
    ("TmpOt", Int16, 1, Some("Tmp_SF")),
    ("Tmp_SF", Sunssf, 1, None),
    ("St", Enum16, 1, None),
    ("StVnd", Enum16, 1, None),
    ("Evt1", Bitfield32, 2, None),
    ("Evt2", Bitfield32, 2, None),
    ("EvtVnd1", Bitfield32, 2, None),
    ("EvtVnd2", Bitfield32, 2, None),
    ("EvtVnd3", Bitfield32, 2, None),
    ("EvtVnd4", Bitfield32, 2, None),
];

const NAMEPLATE: &[PointSpec] = &[
    ("DERTyp", Enum16, 1, None),
    ("WRtg", Uint16, 1, Some("WRtg_SF")),
    ("WRtg_SF", Sunssf, 1, None),
    ("VARtg", Uint16, 1, Some("VARtg_SF")),
    ("VARtg_SF", Sunssf, 1, None),
    ("VArRtgQ1", Int16, 1, Some("VArRtg_SF")),
    ("VArRtgQ2", Int16, 1, Some("VArRtg_SF")),
    ("VArRtgQ3", Int16, 1, Some("VArRtg_SF")),
    ("VArRtgQ4", Int16, 1, Some("VArRtg_SF")),
    ("VArRtg_SF", Sunssf, 1, None),
    ("ARtg", Uint16, 1, Some("ARtg_SF")),
    ("ARtg_SF", Sunssf, 1, None),
    ("PFRtgQ1", Int16, 1, Some("PFRtg_SF")),
    ("PFRtgQ2", Int16, 1, Some("PFRtg_SF")),
    ("PFRtgQ3", Int16, 1, Some("PFRtg_SF")),
    ("PFRtgQ4", Int16, 1, Some("PFRtg_SF")),
    ("PFRtg_SF", Sunssf, 1, None),
    ("WHRtg", Uint16, 1, Some("WHRtg_SF")),
    ("WHRtg_SF", Sunssf, 1, None),
    ("AhrRtg", Uint16, 1, Some("AhrRtg_SF")),
    ("AhrRtg_SF", Sunssf, 1, None),
    ("MaxChaRte", Uint16, 1, Some("MaxChaRte_SF")),
    ("MaxChaRte_SF", Sunssf, 1, None),
    ("MaxDisChaRte", Uint16, 1, Some("MaxDisChaRte_SF")),
    ("MaxDisChaRte_SF", Sunssf, 1, None),
    ("Pad", Pad, 1, None),
];

const SETTINGS: &[PointSpec] = &[
    ("WMax", Uint16, 1, Some("WMax_SF")),
    ("VRef", Uint16, 1, Some("VRef_SF")),
    ("VRefOfs", Int16, 1, Some("VRefOfs_SF")),
    ("VMax", Uint16, 1, Some("VMinMax_SF")),
    ("VMin", Uint16, 1, Some("VMinMax_SF")),
    ("VAMax", Uint16, 1, Some("VAMax_SF")),
    ("VArMaxQ1", Int16, 1, Some("VArMax_SF")),
    ("VArMaxQ2", Int16, 1, Some("VArMax_SF")),
    ("VArMaxQ3", Int16, 1, Some("VArMax_SF")),
    ("VArMaxQ4", Int16, 1, Some("VArMax_SF")),
    ("WGra", Uint16, 1, Some("WGra_SF")),
    ("PFMinQ1", Int16, 1, Some("PFMin_SF")),
    ("PFMinQ2", Int16, 1, Some("PFMin_SF")),
    ("PFMinQ3", Int16, 1, Some("PFMin_SF")),
    ("PFMinQ4", Int16, 1, Some("PFMin_SF")),
    ("VArAct", Enum16, 1, None),
    ("ClcTotVA", Enum16, 1, None),
    ("MaxRmpRte", Uint16, 1, Some("MaxRmpRte_SF")),
    ("ECPNomHz", Uint16, 1, Some("ECPNomHz_SF")),
    ("ConnPh", Enum16, 1, None),
    ("WMax_SF", Sunssf, 1, None),
    ("VRef_SF", Sunssf, 1, None),
    ("VRefOfs_SF", Sunssf, 1, None),
    ("VMinMax_SF", Sunssf, 1, None),
    ("VAMax_SF", Sunssf, 1, None),
    ("VArMax_SF", Sunssf, 1, None),
    ("WGra_SF", Sunssf, 1, None),
    ("PFMin_SF", Sunssf, 1, None),
    ("MaxRmpRte_SF", Sunssf, 1, None),
    ("ECPNomHz_SF", Sunssf, 1, None),
];

const STATUS: &[PointSpec] = &[
    ("PVConn", Bitfield16, 1, None),
    ("StorConn", Bitfield16, 1, None),
    ("ECPConn", Bitfield16, 1, None),
    ("ActWh", Acc64, 4, None),
    ("ActVAh", Acc64, 4, None),
    ("ActVArhQ1", Acc64, 4, None),
    ("ActVArhQ2", Acc64, 4, None),
    ("ActVArhQ3", Acc64, 4, None),
    ("ActVArhQ4", Acc64, 4, None),
    ("VArAval", Int16, 1, Some("VArAval_SF")),
    ("VArAval_SF", Sunssf, 1, None),
    ("WAval", Uint16, 1, Some("WAval_SF")),
    ("WAval_SF", Sunssf, 1, None),
    ("StSetLimMsk", Bitfield32, 2, None),
    ("StActCtl", Bitfield32, 2, None),
    ("TmSrc", Str, 4, None),
    ("Tms", Uint32, 2, None),
    ("RtSt", Bitfield16, 1, None),
    ("Ris", Uint16, 1, Some("Ris_SF")),
    ("Ris_SF", Sunssf, 1, None),
];

const CONTROLS: &[PointSpec] = &[
    ("Conn_WinTms", Uint16, 1, None),
    ("Conn_RvrtTms", Uint16, 1, None),
    ("Conn", Enum16, 1, None),
    ("WMaxLimPct", Uint16, 1, Some("WMaxLimPct_SF")),
    ("WMaxLimPct_WinTms", Uint16, 1, None),
    ("WMaxLimPct_RvrtTms", Uint16, 1, None),
    ("WMaxLimPct_RmpTms", Uint16, 1, None),
    ("WMaxLim_Ena", Enum16, 1, None),
    ("OutPFSet", Int16, 1, Some("OutPFSet_SF")),
    ("OutPFSet_WinTms", Uint16, 1, None),
    ("OutPFSet_RvrtTms", Uint16, 1, None),
    ("OutPFSet_RmpTms", Uint16, 1, None),
    ("OutPFSet_Ena", Enum16, 1, None),
    ("VArWMaxPct", Int16, 1, Some("VArPct_SF")),
    ("VArMaxPct", Int16, 1, Some("VArPct_SF")),
    ("VArAvalPct", Int16, 1, Some("VArPct_SF")),
    ("VArPct_WinTms", Uint16, 1, None),
    ("VArPct_RvrtTms", Uint16, 1, None),
    ("VArPct_RmpTms", Uint16, 1, None),
    ("VArPct_Mod", Enum16, 1, None),
    ("VArPct_Ena", Enum16, 1, None),
    ("WMaxLimPct_SF", Sunssf, 1, None),
    ("OutPFSet_SF", Sunssf, 1, None),
    ("VArPct_SF", Sunssf, 1, None),
];

const STORAGE: &[PointSpec] = &[
    ("WChaMax", Uint16, 1, Some("WChaMax_SF")),
    ("WChaGra", Uint16, 1, Some("WChaDisChaGra_SF")),
    ("WDisChaGra", Uint16, 1, Some("WChaDisChaGra_SF")),
    ("StorCtl_Mod", Bitfield16, 1, None),
    ("VAChaMax", Uint16, 1, Some("VAChaMax_SF")),
    ("MinRsvPct", Uint16, 1, Some("MinRsvPct_SF")),
    ("ChaState", Uint16, 1, Some("ChaState_SF")),
    ("StorAval", Uint16, 1, Some("StorAval_SF")),
    ("InBatV", Uint16, 1, Some("InBatV_SF")),
    ("ChaSt", Enum16, 1, None),
    ("OutWRte", Int16, 1, Some("InOutWRte_SF")),
    ("InWRte", Int16, 1, Some("InOutWRte_SF")),
    ("InOutWRte_WinTms", Uint16, 1, None),
    ("InOutWRte_RvrtTms", Uint16, 1, None),
    ("InOutWRte_RmpTms", Uint16, 1, None),
    ("ChaGriSet", Enum16, 1, None),
    ("WChaMax_SF", Sunssf, 1, None),
    ("WChaDisChaGra_SF", Sunssf, 1, None),
    ("VAChaMax_SF", Sunssf, 1, None),
    ("MinRsvPct_SF", Sunssf, 1, None),
    ("ChaState_SF", Sunssf, 1, None),
    ("StorAval_SF", Sunssf, 1, None),
    ("InBatV_SF", Sunssf, 1, None),
    ("InOutWRte_SF", Sunssf, 1, None),
];

// Fixed block only; the per-module repeating block is not decoded.
const MPPT: &[PointSpec] = &[
    ("DCA_SF", Sunssf, 1, None),
    ("DCV_SF", Sunssf, 1, None),
    ("DCW_SF", Sunssf, 1, None),
    ("DCWH_SF", Sunssf, 1, None),
    ("Evt", Bitfield32, 2, None),
    ("N", Count, 1, None),
    ("TmsPer", Uint16, 1, None),
];

const MODELS: &[(u16, &str, &[PointSpec])] = &[
    (1, "common", COMMON),
    (101, "inverter", INVERTER),
    (102, "inverter", INVERTER),
    (103, "inverter", INVERTER),
    (120, "nameplate", NAMEPLATE),
    (121, "settings", SETTINGS),
    (122, "status", STATUS),
    (123, "controls", CONTROLS),
    (124, "storage", STORAGE),
    (160, "mppt", MPPT),
];

pub(crate) fn definitions() -> Vec<ModelDefinition> {
    MODELS
        .iter()
        .map(|(id, name, specs)| build(*id, name, specs))
        .collect()
}

fn build(id: u16, name: &str, specs: &[PointSpec]) -> ModelDefinition {
    let mut offset = 0u16;
    let points = specs
        .iter()
        .map(|(point, kind, size, sf)| {
            let definition = PointDefinition {
                name: point.to_string(),
                offset,
                kind: *kind,
                size: *size,
                scale_factor: sf.map(|sf| ScaleFactor::Point(sf.to_string())),
            };
            offset += size;
            definition
        })
        .collect();

    ModelDefinition {
        id,
        name: name.to_string(),
        length: offset,
        points,
    }
}
