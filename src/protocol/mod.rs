//! Wire protocol shared by the server and browser clients

pub mod packet;

pub use packet::{
    Command, GameOptions, LobbyPlayerInfo, LobbyState, PaddleDelta, Packet, PacketKind,
    PlayerDelta, PlayerId, StartPlayer, TickPacket, TrailDelta,
};
