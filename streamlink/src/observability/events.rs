//! Canonical structured event names used across `streamlink`.

// Event hook dispatch.
pub const EVENT_LISTENER_LAGGED: &str = "event_listener_lagged";
pub const EVENT_LISTENER_CLOSED: &str = "event_listener_closed";

// Pipe member and endpoint events.
pub const PIPE_CONNECT_START: &str = "pipe_connect_start";
pub const PIPE_CONNECT_OK: &str = "pipe_connect_ok";
pub const PIPE_CONNECT_FAILED: &str = "pipe_connect_failed";
pub const PIPE_CONNECT_REJECTED: &str = "pipe_connect_rejected";
pub const PIPE_ENDPOINT_CLOSED: &str = "pipe_endpoint_closed";
pub const PIPE_PACKET_UNROUTED: &str = "pipe_packet_unrouted";
pub const PIPE_PACKET_DUPLICATE: &str = "pipe_packet_duplicate";
pub const PIPE_PACKET_WRONG_DIRECTION: &str = "pipe_packet_wrong_direction";
pub const PIPE_ACK_SEND_FAILED: &str = "pipe_ack_send_failed";
pub const PIPE_CLOSE_SEND_FAILED: &str = "pipe_close_send_failed";

// Wire member and connection events.
pub const WIRE_CONNECT_OK: &str = "wire_connect_ok";
pub const WIRE_CONNECT_FAILED: &str = "wire_connect_failed";
pub const WIRE_CONNECT_REJECTED: &str = "wire_connect_rejected";
pub const WIRE_CONNECTION_CLOSED: &str = "wire_connection_closed";
pub const WIRE_VALUE_STALE: &str = "wire_value_stale";
pub const WIRE_VALUE_UNROUTED: &str = "wire_value_unrouted";
pub const WIRE_VALUE_WRONG_DIRECTION: &str = "wire_value_wrong_direction";
pub const WIRE_CALLBACK_FAILED: &str = "wire_callback_failed";
pub const WIRE_CLOSE_SEND_FAILED: &str = "wire_close_send_failed";

// Service-side helpers.
pub const BROADCAST_SEND_FAILED: &str = "broadcast_send_failed";
pub const BROADCAST_BACKLOG_FULL: &str = "broadcast_backlog_full";
pub const BROADCAST_ENDPOINT_ACCEPTED: &str = "broadcast_endpoint_accepted";
pub const UNICAST_CONNECTION_SUPERSEDED: &str = "unicast_connection_superseded";

// Generator events.
pub const GENERATOR_START: &str = "generator_start";
pub const GENERATOR_START_FAILED: &str = "generator_start_failed";
pub const GENERATOR_RELEASED: &str = "generator_released";
pub const GENERATOR_ABORT_FAILED: &str = "generator_abort_failed";

// Skeleton and client.
pub const SKELETON_MEMBER_WIRED: &str = "skeleton_member_wired";
pub const SKELETON_MEMBER_CLOSE_FAILED: &str = "skeleton_member_close_failed";
pub const CLIENT_MEMBER_CLOSE_FAILED: &str = "client_member_close_failed";

// Service subscription lifecycle.
pub const SUBSCRIPTION_CONNECT_ATTEMPT: &str = "subscription_connect_attempt";
pub const SUBSCRIPTION_CONNECT_OK: &str = "subscription_connect_ok";
pub const SUBSCRIPTION_CONNECT_FAILED: &str = "subscription_connect_failed";
pub const SUBSCRIPTION_CLIENT_LOST: &str = "subscription_client_lost";
pub const SUBSCRIPTION_SLOT_CANCELLED: &str = "subscription_slot_cancelled";
pub const SUBSCRIPTION_SERVICE_DETECTED: &str = "subscription_service_detected";
pub const SUBSCRIPTION_SERVICE_LOST: &str = "subscription_service_lost";
pub const SUBSCRIPTION_FILTER_REJECTED: &str = "subscription_filter_rejected";
pub const SUBSCRIPTION_MAX_CONNECTIONS: &str = "subscription_max_connections";
pub const SUBSCRIPTION_TARGET_UPDATED: &str = "subscription_target_updated";
pub const SUBSCRIPTION_CLOSED: &str = "subscription_closed";
pub const SUBSCRIPTION_DISCOVERY_LAGGED: &str = "subscription_discovery_lagged";

// Member subscriptions.
pub const MEMBER_SUBSCRIPTION_CONNECT_OK: &str = "member_subscription_connect_ok";
pub const MEMBER_SUBSCRIPTION_CONNECT_FAILED: &str = "member_subscription_connect_failed";
pub const MEMBER_SUBSCRIPTION_CLIENT_DROPPED: &str = "member_subscription_client_dropped";
pub const MEMBER_SUBSCRIPTION_SEND_FAILED: &str = "member_subscription_send_failed";
pub const MEMBER_SUBSCRIPTION_PACKET_DROPPED: &str = "member_subscription_packet_dropped";

// Subscription manager.
pub const MANAGER_SUBSCRIPTION_ADD: &str = "manager_subscription_add";
pub const MANAGER_SUBSCRIPTION_REMOVE: &str = "manager_subscription_remove";
pub const MANAGER_SUBSCRIPTION_ENABLE: &str = "manager_subscription_enable";
pub const MANAGER_SUBSCRIPTION_DISABLE: &str = "manager_subscription_disable";
pub const MANAGER_SUBSCRIPTION_CREATE_FAILED: &str = "manager_subscription_create_failed";
