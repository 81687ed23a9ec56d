//! Warp-control messages
//!
//! | tag | name | direction |
//! |---|---|---|
//! | 0 | REQUEST_CONTROLLER | client → server |
//! | 1 | RELEASE_CONTROLLER | either → all |
//! | 2 | SET_CONTROLLER | server → clients |
//! | 3 | REQUEST_VOTE | server → clients |
//! | 4 | REPLY_VOTE | voter → server → candidate |
//! | 5 | CHANGE_WARP | client → server → others |
//! | 6 | NEW_SUBSPACE | client → server → all |
//! | 7 | CHANGE_SUBSPACE | client → server → others |
//! | 8 | RELOCK_SUBSPACE | server → all |
//! | 9 | REPORT_RATE | client → server, server → client |
//! | 10 | SET_SUBSPACE | server → client(s) |

use bytes::Bytes;

use warpsync_core::{ClockTicks, Subspace, SubspaceId, WarpError, WarpResult};

use crate::{WireReader, WireWriter};

/// Message tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum WarpTag {
    RequestController = 0,
    ReleaseController = 1,
    SetController = 2,
    RequestVote = 3,
    ReplyVote = 4,
    ChangeWarp = 5,
    NewSubspace = 6,
    ChangeSubspace = 7,
    RelockSubspace = 8,
    ReportRate = 9,
    SetSubspace = 10,
}

impl WarpTag {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(WarpTag::RequestController),
            1 => Some(WarpTag::ReleaseController),
            2 => Some(WarpTag::SetController),
            3 => Some(WarpTag::RequestVote),
            4 => Some(WarpTag::ReplyVote),
            5 => Some(WarpTag::ChangeWarp),
            6 => Some(WarpTag::NewSubspace),
            7 => Some(WarpTag::ChangeSubspace),
            8 => Some(WarpTag::RelockSubspace),
            9 => Some(WarpTag::ReportRate),
            10 => Some(WarpTag::SetSubspace),
            _ => None,
        }
    }

    #[inline]
    pub fn to_i32(self) -> i32 {
        self as i32
    }
}

/// A warp announcement: the sender's warp setting and where its timeline was
/// when it changed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WarpRate {
    /// Physics warp (low rates) rather than on-rails warp
    pub is_physics_warp: bool,
    /// Index into the warp rate table of the chosen kind
    pub rate_index: i32,
    /// Server clock when the rate was set
    pub epoch_clock: ClockTicks,
    /// Universe time when the rate was set
    pub epoch_time: f64,
}

impl WarpRate {
    fn write(&self, w: &mut WireWriter) {
        w.put_bool(self.is_physics_warp);
        w.put_i32(self.rate_index);
        w.put_ticks(self.epoch_clock);
        w.put_f64(self.epoch_time);
    }

    fn read(r: &mut WireReader<'_>) -> WarpResult<Self> {
        Ok(WarpRate {
            is_physics_warp: r.bool()?,
            rate_index: r.i32()?,
            epoch_clock: r.ticks()?,
            epoch_time: r.f64()?,
        })
    }
}

fn write_epoch(w: &mut WireWriter, epoch: &Subspace) {
    w.put_ticks(epoch.epoch_clock);
    w.put_f64(epoch.epoch_time);
    w.put_f32(epoch.rate);
}

fn read_epoch(r: &mut WireReader<'_>) -> WarpResult<Subspace> {
    let epoch_clock = r.ticks()?;
    let epoch_time = r.f64()?;
    let rate = r.f32()?;
    Ok(Subspace::new(epoch_clock, epoch_time, rate))
}

fn read_tag(r: &mut WireReader<'_>) -> WarpResult<WarpTag> {
    let raw = r.i32()?;
    WarpTag::from_i32(raw).ok_or(WarpError::UnknownMessageTag(raw))
}

fn wrong_direction(tag: WarpTag, from: &str) -> WarpError {
    WarpError::InvalidWireFormat(format!("{tag:?} is not accepted from {from}"))
}

/// Client → server messages
#[derive(Clone, Debug, PartialEq)]
pub enum WarpRequest {
    RequestController,
    ReleaseController,
    /// The server overwrites `voter` with the sender's name
    ReplyVote { voter: String, vote: bool },
    ChangeWarp(WarpRate),
    NewSubspace {
        epoch_clock: ClockTicks,
        epoch_time: f64,
        rate: f32,
    },
    ChangeSubspace { subspace: SubspaceId },
    ReportRate { rate: f32 },
}

impl WarpRequest {
    pub fn tag(&self) -> WarpTag {
        match self {
            WarpRequest::RequestController => WarpTag::RequestController,
            WarpRequest::ReleaseController => WarpTag::ReleaseController,
            WarpRequest::ReplyVote { .. } => WarpTag::ReplyVote,
            WarpRequest::ChangeWarp(_) => WarpTag::ChangeWarp,
            WarpRequest::NewSubspace { .. } => WarpTag::NewSubspace,
            WarpRequest::ChangeSubspace { .. } => WarpTag::ChangeSubspace,
            WarpRequest::ReportRate { .. } => WarpTag::ReportRate,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.put_i32(self.tag().to_i32());
        match self {
            WarpRequest::RequestController | WarpRequest::ReleaseController => {}
            WarpRequest::ReplyVote { voter, vote } => {
                w.put_str(voter);
                w.put_bool(*vote);
            }
            WarpRequest::ChangeWarp(rate) => rate.write(&mut w),
            WarpRequest::NewSubspace {
                epoch_clock,
                epoch_time,
                rate,
            } => {
                w.put_ticks(*epoch_clock);
                w.put_f64(*epoch_time);
                w.put_f32(*rate);
            }
            WarpRequest::ChangeSubspace { subspace } => w.put_subspace(*subspace),
            WarpRequest::ReportRate { rate } => w.put_f32(*rate),
        }
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> WarpResult<Self> {
        let mut r = WireReader::new(buf);
        let tag = read_tag(&mut r)?;
        let msg = match tag {
            WarpTag::RequestController => WarpRequest::RequestController,
            WarpTag::ReleaseController => WarpRequest::ReleaseController,
            WarpTag::ReplyVote => WarpRequest::ReplyVote {
                voter: r.string()?,
                vote: r.bool()?,
            },
            WarpTag::ChangeWarp => WarpRequest::ChangeWarp(WarpRate::read(&mut r)?),
            WarpTag::NewSubspace => WarpRequest::NewSubspace {
                epoch_clock: r.ticks()?,
                epoch_time: r.f64()?,
                rate: r.f32()?,
            },
            WarpTag::ChangeSubspace => WarpRequest::ChangeSubspace {
                subspace: r.subspace()?,
            },
            WarpTag::ReportRate => WarpRequest::ReportRate { rate: r.f32()? },
            WarpTag::SetController
            | WarpTag::RequestVote
            | WarpTag::RelockSubspace
            | WarpTag::SetSubspace => return Err(wrong_direction(tag, "clients")),
        };
        r.finish()?;
        Ok(msg)
    }
}

/// Server → client messages
#[derive(Clone, Debug, PartialEq)]
pub enum WarpEvent {
    ReleaseController,
    SetController {
        controller: String,
        expiry: ClockTicks,
    },
    RequestVote {
        candidate: String,
        expiry: ClockTicks,
    },
    ReplyVote {
        voter: String,
        vote: bool,
    },
    ChangeWarp {
        from: String,
        rate: WarpRate,
    },
    NewSubspace {
        subspace: SubspaceId,
        epoch: Subspace,
    },
    ChangeSubspace {
        from: String,
        subspace: SubspaceId,
    },
    RelockSubspace {
        origin: String,
        subspace: SubspaceId,
        epoch: Subspace,
    },
    ReportRate {
        peer: String,
        subspace: SubspaceId,
        rate: f32,
    },
    SetSubspace {
        subspace: SubspaceId,
    },
}

impl WarpEvent {
    pub fn tag(&self) -> WarpTag {
        match self {
            WarpEvent::ReleaseController => WarpTag::ReleaseController,
            WarpEvent::SetController { .. } => WarpTag::SetController,
            WarpEvent::RequestVote { .. } => WarpTag::RequestVote,
            WarpEvent::ReplyVote { .. } => WarpTag::ReplyVote,
            WarpEvent::ChangeWarp { .. } => WarpTag::ChangeWarp,
            WarpEvent::NewSubspace { .. } => WarpTag::NewSubspace,
            WarpEvent::ChangeSubspace { .. } => WarpTag::ChangeSubspace,
            WarpEvent::RelockSubspace { .. } => WarpTag::RelockSubspace,
            WarpEvent::ReportRate { .. } => WarpTag::ReportRate,
            WarpEvent::SetSubspace { .. } => WarpTag::SetSubspace,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        w.put_i32(self.tag().to_i32());
        match self {
            WarpEvent::ReleaseController => {}
            WarpEvent::SetController { controller, expiry } => {
                w.put_str(controller);
                w.put_ticks(*expiry);
            }
            WarpEvent::RequestVote { candidate, expiry } => {
                w.put_str(candidate);
                w.put_ticks(*expiry);
            }
            WarpEvent::ReplyVote { voter, vote } => {
                w.put_str(voter);
                w.put_bool(*vote);
            }
            WarpEvent::ChangeWarp { from, rate } => {
                w.put_str(from);
                rate.write(&mut w);
            }
            WarpEvent::NewSubspace { subspace, epoch } => {
                w.put_subspace(*subspace);
                write_epoch(&mut w, epoch);
            }
            WarpEvent::ChangeSubspace { from, subspace } => {
                w.put_str(from);
                w.put_subspace(*subspace);
            }
            WarpEvent::RelockSubspace {
                origin,
                subspace,
                epoch,
            } => {
                w.put_str(origin);
                w.put_subspace(*subspace);
                write_epoch(&mut w, epoch);
            }
            WarpEvent::ReportRate {
                peer,
                subspace,
                rate,
            } => {
                w.put_str(peer);
                w.put_subspace(*subspace);
                w.put_f32(*rate);
            }
            WarpEvent::SetSubspace { subspace } => w.put_subspace(*subspace),
        }
        w.finish()
    }

    pub fn decode(buf: &[u8]) -> WarpResult<Self> {
        let mut r = WireReader::new(buf);
        let tag = read_tag(&mut r)?;
        let msg = match tag {
            WarpTag::ReleaseController => WarpEvent::ReleaseController,
            WarpTag::SetController => WarpEvent::SetController {
                controller: r.string()?,
                expiry: r.ticks()?,
            },
            WarpTag::RequestVote => WarpEvent::RequestVote {
                candidate: r.string()?,
                expiry: r.ticks()?,
            },
            WarpTag::ReplyVote => WarpEvent::ReplyVote {
                voter: r.string()?,
                vote: r.bool()?,
            },
            WarpTag::ChangeWarp => WarpEvent::ChangeWarp {
                from: r.string()?,
                rate: WarpRate::read(&mut r)?,
            },
            WarpTag::NewSubspace => WarpEvent::NewSubspace {
                subspace: r.subspace()?,
                epoch: read_epoch(&mut r)?,
            },
            WarpTag::ChangeSubspace => WarpEvent::ChangeSubspace {
                from: r.string()?,
                subspace: r.subspace()?,
            },
            WarpTag::RelockSubspace => WarpEvent::RelockSubspace {
                origin: r.string()?,
                subspace: r.subspace()?,
                epoch: read_epoch(&mut r)?,
            },
            WarpTag::ReportRate => WarpEvent::ReportRate {
                peer: r.string()?,
                subspace: r.subspace()?,
                rate: r.f32()?,
            },
            WarpTag::SetSubspace => WarpEvent::SetSubspace {
                subspace: r.subspace()?,
            },
            WarpTag::RequestController => return Err(wrong_direction(tag, "the server")),
        };
        r.finish()?;
        Ok(msg)
    }
}
