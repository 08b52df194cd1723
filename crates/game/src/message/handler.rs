use super::types::*;

/// Receives decoded messages, one method per message kind.
///
/// Every method defaults to ignoring the message, so a handler only overrides the kinds
/// its side of the connection expects.
#[allow(unused_variables)]
pub trait MessageHandler {
    fn on_player_input(&mut self, message: PlayerInputMessage, sequence: u16) {}

    fn on_entity_add(&mut self, message: EntityAddMessage, sequence: u16) {}

    fn on_entity_remove(&mut self, message: EntityRemoveMessage, sequence: u16) {}

    fn on_player_join(&mut self, message: PlayerJoinMessage, sequence: u16) {}

    fn on_player_leave(&mut self, message: PlayerLeaveMessage, sequence: u16) {}

    fn on_player_name(&mut self, message: PlayerNameMessage, sequence: u16) {}

    fn on_player_stats(&mut self, message: PlayerStatsMessage, sequence: u16) {}

    fn on_player_kill(&mut self, message: PlayerKillMessage, sequence: u16) {}

    fn on_player_chat(&mut self, message: PlayerChatMessage, sequence: u16) {}

    fn on_update_transform(&mut self, message: UpdateTransformMessage, sequence: u16) {}

    fn on_update_avatar(&mut self, message: UpdateAvatarMessage, sequence: u16) {}

    fn on_update_ray(&mut self, message: UpdateRayMessage, sequence: u16) {}

    fn on_client_synced(&mut self, message: ClientSyncedMessage, sequence: u16) {}

    fn on_server_info(&mut self, message: ServerInfoMessage, sequence: u16) {}
}
