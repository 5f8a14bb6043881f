pub const OBJECT_CLASS: &str = "objectClass";
pub const SERVICE_ID: &str = "service.id";
pub const SERVICE_RANKING: &str = "service.ranking";
pub const SERVICE_PID: &str = "service.pid";
