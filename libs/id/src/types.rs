//! Typed ULID ids minted by the admin service.

use crate::define_id;

/// Identifies one computed resource plan (one scheduling tick).
define_id!(PlanId, "plan");

/// Correlates one RPC request across log lines.
define_id!(RequestId, "req");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_id_roundtrip() {
        let id = PlanId::new();
        let parsed: PlanId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("plan_"));
    }

    #[test]
    fn test_request_id_invalid_prefix() {
        let result: Result<RequestId, _> = "plan_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn test_request_id_missing_separator() {
        let result: Result<RequestId, _> = "req01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator('_')
        ));
    }

    #[test]
    fn test_request_id_invalid_ulid() {
        let result: Result<RequestId, _> = "req_invalid".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_plan_ids_sortable() {
        let id1 = PlanId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = PlanId::new();
        assert!(id1 < id2);
    }

    #[test]
    fn test_plan_id_json() {
        let id = PlanId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
