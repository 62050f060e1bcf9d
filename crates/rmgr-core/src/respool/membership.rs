//! Membership store adapter.
//!
//! Values are JSON objects with a `requesthead` and a `segStatData` holding
//! a nested `SegInfo`. Each required field is extracted on its own and the
//! first missing or ill-typed one aborts the update. The hostname comes from
//! the key, `<server dir><hostname>`; an empty value means the host left.

use serde_json::{Map, Value};
use thiserror::Error;

use super::{SegInfo, SegStat, StatusDesc, SEGSTAT_ID_INVALID};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipParseError {
    #[error("key {key} is not under membership dir {dir}")]
    ForeignKey { key: String, dir: String },
    #[error("value is not a JSON object: {0}")]
    Json(String),
    #[error("missing required field {0}")]
    Missing(&'static str),
    #[error("field {field} is not {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MembershipUpdate {
    Departed { hostname: String },
    Report(SegStat),
}

type Obj = Map<String, Value>;

fn field<'a>(obj: &'a Obj, name: &'static str) -> Result<&'a Value, MembershipParseError> {
    obj.get(name).ok_or(MembershipParseError::Missing(name))
}

fn object<'a>(obj: &'a Obj, name: &'static str) -> Result<&'a Obj, MembershipParseError> {
    field(obj, name)?
        .as_object()
        .ok_or(MembershipParseError::WrongType {
            field: name,
            expected: "an object",
        })
}

/// Integer field; booleans read as 0/1.
fn int(obj: &Obj, name: &'static str) -> Result<i64, MembershipParseError> {
    let v = field(obj, name)?;
    v.as_i64()
        .or_else(|| v.as_bool().map(i64::from))
        .ok_or(MembershipParseError::WrongType {
            field: name,
            expected: "an integer",
        })
}

fn int_as<T: TryFrom<i64>>(obj: &Obj, name: &'static str) -> Result<T, MembershipParseError> {
    T::try_from(int(obj, name)?).map_err(|_| MembershipParseError::WrongType {
        field: name,
        expected: "an in-range integer",
    })
}

fn boolean(obj: &Obj, name: &'static str) -> Result<bool, MembershipParseError> {
    let v = field(obj, name)?;
    v.as_bool()
        .or_else(|| v.as_i64().map(|n| n != 0))
        .ok_or(MembershipParseError::WrongType {
            field: name,
            expected: "a boolean",
        })
}

fn string<'a>(obj: &'a Obj, name: &'static str) -> Result<&'a str, MembershipParseError> {
    field(obj, name)?
        .as_str()
        .ok_or(MembershipParseError::WrongType {
            field: name,
            expected: "a string",
        })
}

fn string_array(obj: &Obj, name: &'static str) -> Result<Vec<String>, MembershipParseError> {
    let wrong = MembershipParseError::WrongType {
        field: name,
        expected: "an array of strings",
    };
    let items = field(obj, name)?.as_array().ok_or(wrong.clone())?;
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or(wrong.clone()))
        .collect()
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.filter(|s| !s.is_empty()).map(str::to_string)
}

/// Parse one membership store update.
pub fn parse_membership_update(
    server_dir: &str,
    key: &str,
    value: &str,
) -> Result<MembershipUpdate, MembershipParseError> {
    let hostname = key
        .strip_prefix(server_dir)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| MembershipParseError::ForeignKey {
            key: key.to_string(),
            dir: server_dir.to_string(),
        })?
        .to_string();

    if value.trim().is_empty() {
        return Ok(MembershipUpdate::Departed { hostname });
    }

    let root: Value =
        serde_json::from_str(value).map_err(|e| MembershipParseError::Json(e.to_string()))?;
    let root = root
        .as_object()
        .ok_or_else(|| MembershipParseError::Json("top level is not an object".to_string()))?;

    let head = object(root, "requesthead")?;
    let body = object(root, "segStatData")?;
    let info = object(body, "SegInfo")?;

    let failed_tmp_dir_num = int_as::<u32>(head, "TmpDirBrokenCount")?;
    let fts_available = boolean(body, "FTSAvailable")?;
    let grm_handled = boolean(body, "GRMHandled")?;
    let fts_total_memory_mb = int_as::<u32>(body, "FTSTotalMemoryMB")?;
    let fts_total_core = int_as::<u32>(body, "FTSTotalCore")?;
    let grm_total_memory_mb = int_as::<u32>(body, "GRMTotalMemoryMB")?;
    let grm_total_core = int_as::<u32>(body, "GRMTotalCore")?;
    let status_desc = StatusDesc(int_as::<u32>(body, "StatusDesc")?);
    let rm_start_timestamp = int(head, "RMStartTimestamp")?;

    let port = int_as::<u16>(info, "port")?;
    int(info, "ID")?;
    let master = boolean(info, "master")?;
    let standby = boolean(info, "standby")?;
    let alive = boolean(info, "alive")?;
    int(info, "HostAddrCount")?;
    let addresses = string_array(info, "addressArray")?;

    // Offsets and lengths are recomputed when the record is encoded; they
    // are still required to be present.
    int(info, "HostNameOffset")?;
    int(info, "HostNameLen")?;
    string(info, "hostname")?;
    int(info, "GRMHostNameOffset")?;
    int(info, "GRMHostNameLen")?;
    int(info, "GRMRackNameOffset")?;
    int(info, "GRMRackNameLen")?;

    let failed_tmp_dirs = if failed_tmp_dir_num == 0 {
        None
    } else {
        int(info, "FailedTmpDirOffset")?;
        int(info, "FailedTmpDirLen")?;
        non_empty(Some(string(info, "FailedTmpDir")?))
    };
    int(info, "size")?;

    Ok(MembershipUpdate::Report(SegStat {
        info: SegInfo {
            id: SEGSTAT_ID_INVALID,
            port,
            hostname,
            addresses,
            master,
            standby,
            alive,
            grm_hostname: non_empty(info.get("GRMhostname").and_then(Value::as_str)),
            grm_rackname: non_empty(info.get("GRMRackname").and_then(Value::as_str)),
            failed_tmp_dirs,
        },
        failed_tmp_dir_num,
        fts_available,
        grm_handled,
        fts_total_memory_mb,
        fts_total_core,
        grm_total_memory_mb,
        grm_total_core,
        status_desc,
        rm_start_timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DIR: &str = "/rmgr/segments/";

    fn report() -> Value {
        json!({
            "requesthead": {
                "TmpDirCount": 2,
                "TmpDirBrokenCount": 0,
                "Reserved": 0,
                "RMStartTimestamp": 1700000000
            },
            "segStatData": {
                "FTSAvailable": 1,
                "GRMHandled": false,
                "FTSTotalMemoryMB": 65536,
                "FTSTotalCore": 16,
                "GRMTotalMemoryMB": 0,
                "GRMTotalCore": 0,
                "StatusDesc": 0,
                "SegInfo": {
                    "size": 128,
                    "port": 40000,
                    "ID": -1,
                    "master": 0,
                    "standby": 0,
                    "alive": 1,
                    "HostAddrCount": 2,
                    "addressArray": ["127.0.0.1", "10.0.0.5"],
                    "AddressAttributeOffset": 40,
                    "AddressContentOffset": 48,
                    "HostNameOffset": 96,
                    "HostNameLen": 4,
                    "hostname": "sdw5",
                    "GRMHostNameOffset": 0,
                    "GRMHostNameLen": 0,
                    "GRMRackNameOffset": 0,
                    "GRMRackNameLen": 0
                }
            }
        })
    }

    #[test]
    fn report_parses_into_canonical_record() {
        let update = parse_membership_update(DIR, "/rmgr/segments/sdw5", &report().to_string())
            .unwrap();
        let MembershipUpdate::Report(stat) = update else {
            panic!("expected a report");
        };
        assert_eq!(stat.info.hostname, "sdw5");
        assert_eq!(stat.info.addresses, vec!["127.0.0.1", "10.0.0.5"]);
        assert_eq!(stat.info.port, 40000);
        assert!(stat.fts_available);
        assert!(stat.info.alive);
        assert_eq!(stat.fts_total_memory_mb, 65536);
        assert_eq!(stat.info.failed_tmp_dirs, None);
    }

    #[test]
    fn empty_value_is_departure() {
        let update = parse_membership_update(DIR, "/rmgr/segments/sdw5", "").unwrap();
        assert_eq!(
            update,
            MembershipUpdate::Departed {
                hostname: "sdw5".into()
            }
        );
    }

    #[test]
    fn first_missing_field_aborts() {
        let mut v = report();
        v["segStatData"]
            .as_object_mut()
            .unwrap()
            .remove("FTSTotalCore");
        v["segStatData"]["SegInfo"]
            .as_object_mut()
            .unwrap()
            .remove("port");
        let err = parse_membership_update(DIR, "/rmgr/segments/sdw5", &v.to_string()).unwrap_err();
        assert_eq!(err, MembershipParseError::Missing("FTSTotalCore"));
    }

    #[test]
    fn failed_dirs_required_only_when_broken() {
        let mut v = report();
        v["requesthead"]["TmpDirBrokenCount"] = json!(1);
        let err = parse_membership_update(DIR, "/rmgr/segments/sdw5", &v.to_string()).unwrap_err();
        assert_eq!(err, MembershipParseError::Missing("FailedTmpDirOffset"));

        let info = v["segStatData"]["SegInfo"].as_object_mut().unwrap();
        info.insert("FailedTmpDirOffset".into(), json!(104));
        info.insert("FailedTmpDirLen".into(), json!(9));
        info.insert("FailedTmpDir".into(), json!("/data/tmp"));
        let MembershipUpdate::Report(stat) =
            parse_membership_update(DIR, "/rmgr/segments/sdw5", &v.to_string()).unwrap()
        else {
            panic!("expected a report");
        };
        assert_eq!(stat.failed_tmp_dir_num, 1);
        assert_eq!(stat.info.failed_tmp_dirs.as_deref(), Some("/data/tmp"));
    }

    #[test]
    fn wrong_types_and_bad_json_are_errors() {
        let mut v = report();
        v["segStatData"]["FTSTotalMemoryMB"] = json!("lots");
        assert!(matches!(
            parse_membership_update(DIR, "/rmgr/segments/sdw5", &v.to_string()),
            Err(MembershipParseError::WrongType {
                field: "FTSTotalMemoryMB",
                ..
            })
        ));
        assert!(matches!(
            parse_membership_update(DIR, "/rmgr/segments/sdw5", "{not json"),
            Err(MembershipParseError::Json(_))
        ));
    }

    #[test]
    fn key_outside_dir_is_rejected() {
        assert!(matches!(
            parse_membership_update(DIR, "/elsewhere/sdw5", ""),
            Err(MembershipParseError::ForeignKey { .. })
        ));
        assert!(matches!(
            parse_membership_update(DIR, DIR, ""),
            Err(MembershipParseError::ForeignKey { .. })
        ));
    }
}
