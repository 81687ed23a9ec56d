//! End-to-end warp scenarios
//!
//! Each scenario runs a real server and real coordinators over the loopback
//! cluster:
//! - voted control with a single peer (one vote decides)
//! - restart from a persisted record
//! - subspace branching after a local warp
//! - forced control, mirroring, and replayed announcements
//! - rate consensus relocks
//! - lowest-rate mirroring, including the return to real time
//! - concurrent subspace creation

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use warpsync_client::{InputEdges, TimeWarp, NOTICE_VOTE_FAILED};
    use warpsync_core::{ClockTicks, ConnectionId, Subspace, SubspaceId, WarpMode};
    use warpsync_server::{
        FileSubspaceStore, MemorySubspaceStore, ServerConfig, SubspaceSnapshot, WarpControl,
    };
    use warpsync_time::{Clock, ManualClock};
    use warpsync_wire::{WarpEvent, WarpRequest};

    use crate::{init_tracing, WarpCluster, CLUSTER_EPOCH};

    fn settle(cluster: &mut WarpCluster) {
        cluster.tick_all();
        cluster.tick_all();
    }

    fn cluster_of(mode: WarpMode, names: &[&str]) -> WarpCluster {
        init_tracing();
        let mut cluster = WarpCluster::new(mode);
        for name in names {
            cluster.connect(name);
        }
        settle(&mut cluster);
        cluster
    }

    /// Alice opens a vote that Bob, the only other player, answers
    fn open_vote(cluster: &mut WarpCluster, bob_says_yes: bool) {
        cluster.tick(0, InputEdges::increase());
        let vote = if bob_says_yes {
            InputEdges::increase()
        } else {
            InputEdges::decrease()
        };
        cluster.tick(1, vote);
        cluster.tick(0, InputEdges::NONE);
    }

    #[test]
    fn test_vote_with_one_peer_single_yes_seats_candidate() {
        let mut cluster = cluster_of(WarpMode::McwVote, &["alice", "bob"]);
        open_vote(&mut cluster, true);

        assert!(cluster.client(0).coordinator.election().is_master());
        let grant = cluster
            .server()
            .arbiter()
            .current_grant(cluster.clock().now())
            .unwrap();
        assert_eq!(grant.name, "alice");

        cluster.tick_all();
        assert_eq!(
            cluster.client(1).coordinator.election().warp_master(),
            Some("alice")
        );
    }

    #[test]
    fn test_vote_with_one_peer_single_no_cancels() {
        let mut cluster = cluster_of(WarpMode::McwVote, &["alice", "bob"]);
        open_vote(&mut cluster, false);

        let alice = &mut cluster.client_mut(0).coordinator;
        assert!(alice.election().vote_master().is_none());
        assert!(alice.election().warp_master().is_none());
        assert_eq!(alice.take_notices(), vec![NOTICE_VOTE_FAILED.to_string()]);
        assert!(cluster.server().arbiter().candidate().is_none());

        cluster.tick(1, InputEdges::NONE);
        assert!(cluster.client(1).coordinator.election().vote_master().is_none());
    }

    #[test]
    fn test_restart_from_record_continues_ids() {
        init_tracing();
        let record = SubspaceSnapshot {
            id: SubspaceId::new(3),
            epoch: Subspace::new(CLUSTER_EPOCH, 500.0, 1.0),
        };
        let mut cluster =
            WarpCluster::restarted(ServerConfig::with_mode(WarpMode::Subspace), record);
        let registry = cluster.server().registry();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(SubspaceId::new(3)));
        assert_eq!(registry.next_id(), SubspaceId::new(4));

        cluster.connect("alice");
        settle(&mut cluster);
        assert_eq!(
            cluster.client(0).coordinator.subspaces().current_subspace(),
            Some(SubspaceId::new(3))
        );

        cluster.client_mut(0).coordinator.game_mut().set_rate(4, false);
        cluster.tick(0, InputEdges::NONE);
        cluster.advance(Duration::from_secs(5));
        cluster.client_mut(0).coordinator.game_mut().set_rate(0, false);
        settle(&mut cluster);

        assert!(cluster.server().registry().contains(SubspaceId::new(4)));
        assert_eq!(
            cluster.client(0).coordinator.subspaces().current_subspace(),
            Some(SubspaceId::new(4))
        );
    }

    #[test]
    fn test_file_record_survives_restart() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(CLUSTER_EPOCH));

        let first = WarpControl::new(
            ServerConfig::default(),
            Arc::new(FileSubspaceStore::in_dir(dir.path())),
            clock.clone(),
        );
        let id = first.registry().create(clock.now(), 5_000.0, 0.8);
        drop(first);

        let second = WarpControl::new(
            ServerConfig::default(),
            Arc::new(FileSubspaceStore::in_dir(dir.path())),
            clock.clone(),
        );
        assert_eq!(second.registry().len(), 1);
        let restored = second.registry().get(id).unwrap();
        assert_eq!(restored.epoch_time, 5_000.0);
        assert_eq!(restored.rate, 0.8);
        assert_eq!(second.registry().next_id(), id.next());
    }

    #[test]
    fn test_subspace_mode_branches_exactly_once() {
        let mut cluster = cluster_of(WarpMode::Subspace, &["alice"]);
        assert_eq!(cluster.server().registry().len(), 1);

        cluster.client_mut(0).coordinator.game_mut().set_rate(5, false);
        cluster.tick(0, InputEdges::NONE);
        assert!(!cluster.client(0).coordinator.subspaces().is_locked());

        cluster.advance(Duration::from_secs(10));
        cluster.client_mut(0).coordinator.game_mut().set_rate(0, false);
        for _ in 0..5 {
            cluster.tick(0, InputEdges::NONE);
        }

        let registry = cluster.server().registry();
        assert_eq!(registry.len(), 2);
        let branch = registry.get(SubspaceId::new(1)).unwrap();
        let desired = cluster.client(0).coordinator.subspaces().requested_rate();
        assert_eq!(branch.rate, desired);
        assert_eq!(
            cluster.client(0).coordinator.subspaces().current_subspace(),
            Some(SubspaceId::new(1))
        );
    }

    /// Alice takes forced control and warps to regular index 3; Bob follows
    fn force_warp(cluster: &mut WarpCluster) {
        cluster.tick(0, InputEdges::increase());
        cluster.tick_all();
        cluster.client_mut(0).coordinator.game_mut().set_rate(3, false);
        cluster.tick(0, InputEdges::NONE);
        cluster.clock().advance(Duration::from_secs(2));
        cluster.tick(1, InputEdges::NONE);
    }

    #[test]
    fn test_force_follower_dead_reckons_master() {
        let mut cluster = cluster_of(WarpMode::McwForce, &["alice", "bob"]);
        force_warp(&mut cluster);

        let bob = &cluster.client(1).coordinator;
        assert_eq!(bob.election().warp_master(), Some("alice"));
        let announced = *bob.peers().warp_rate("alice").unwrap();
        assert_eq!(bob.game().current_rate_index(), 3);
        // 50x for the 2 s since the announcement
        let expected = announced.epoch_time + 100.0;
        assert!((bob.game().universe_time() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_replayed_change_warp_is_idempotent() {
        let mut cluster = cluster_of(WarpMode::McwForce, &["alice", "bob"]);
        force_warp(&mut cluster);

        let announced = *cluster.client(1).coordinator.peers().warp_rate("alice").unwrap();
        let game_after_first = cluster.client(1).coordinator.game().clone();
        let replay = WarpEvent::ChangeWarp {
            from: "alice".into(),
            rate: announced,
        };
        for _ in 0..3 {
            cluster.inject(1, &replay);
            cluster.clock().advance(Duration::from_secs(2));
            cluster.tick(1, InputEdges::NONE);
        }

        let bob = &cluster.client(1).coordinator;
        assert_eq!(*bob.game(), game_after_first);
        assert_eq!(*bob.peers().warp_rate("alice").unwrap(), announced);
    }

    #[test]
    fn test_master_disconnect_releases_followers() {
        let mut cluster = cluster_of(WarpMode::McwForce, &["alice", "bob"]);
        force_warp(&mut cluster);

        cluster.disconnect(0);
        cluster.tick(0, InputEdges::NONE);
        let bob = &cluster.client(0).coordinator;
        assert!(bob.election().warp_master().is_none());
        assert_eq!(bob.game().current_rate_index(), 0);
        assert!(bob.peers().warp_rate("alice").is_none());
    }

    #[test]
    fn test_out_of_band_report_relocks_once() {
        let mut cluster = cluster_of(WarpMode::Subspace, &["alice", "bob"]);
        let saves = cluster.store().save_count();
        let alice = cluster.client(0).conn;

        cluster
            .server()
            .handle_message(alice, &WarpRequest::ReportRate { rate: 0.5 }.encode())
            .unwrap();
        cluster.pump();
        cluster.tick_all();

        assert_eq!(cluster.store().save_count(), saves + 1);
        assert_eq!(cluster.store().record().unwrap().epoch.rate, 0.5);
        let seen_by_bob = cluster
            .client(1)
            .coordinator
            .subspaces()
            .subspace(SubspaceId::ZERO)
            .copied()
            .unwrap();
        assert_eq!(seen_by_bob.rate, 0.5);

        for rate in [0.49, 0.51, 0.5] {
            cluster
                .server()
                .handle_message(alice, &WarpRequest::ReportRate { rate }.encode())
                .unwrap();
        }
        assert_eq!(cluster.store().save_count(), saves + 1);
    }

    fn warps(cluster: &WarpCluster) -> Vec<(bool, i32)> {
        (0..cluster.len())
            .map(|i| {
                let game = cluster.client(i).coordinator.game();
                (game.is_physics_warp(), game.current_rate_index())
            })
            .collect()
    }

    fn choose_warp(cluster: &mut WarpCluster, index: usize, rate_index: i32) {
        cluster
            .client_mut(index)
            .coordinator
            .game_mut()
            .set_rate(rate_index, false);
    }

    #[test]
    fn test_lowest_mode_runs_at_slowest_choice() {
        let mut cluster = cluster_of(WarpMode::McwLowest, &["alice", "bob", "carol"]);
        choose_warp(&mut cluster, 0, 4);
        cluster.tick(0, InputEdges::NONE);
        choose_warp(&mut cluster, 1, 2);
        cluster.tick(1, InputEdges::NONE);
        // Carol has not picked a warp, so nobody warps
        assert_eq!(warps(&cluster), vec![(false, 0); 3]);

        choose_warp(&mut cluster, 2, 6);
        settle(&mut cluster);
        assert_eq!(warps(&cluster), vec![(false, 2); 3]);

        choose_warp(&mut cluster, 1, 5);
        settle(&mut cluster);
        assert_eq!(warps(&cluster), vec![(false, 4); 3]);
    }

    #[test]
    fn test_lowest_mode_returns_to_real_time_after_warp() {
        let mut cluster = cluster_of(WarpMode::McwLowest, &["alice", "bob", "carol"]);
        for i in 0..cluster.len() {
            choose_warp(&mut cluster, i, 3);
        }
        settle(&mut cluster);
        assert_eq!(warps(&cluster), vec![(false, 3); 3]);

        choose_warp(&mut cluster, 0, 0);
        settle(&mut cluster);
        assert_eq!(warps(&cluster), vec![(false, 0); 3]);
        let alice = &cluster.client(0).coordinator;
        assert_eq!(alice.peers().warp_rate("bob").unwrap().rate_index, 3);

        choose_warp(&mut cluster, 0, 3);
        settle(&mut cluster);
        assert_eq!(warps(&cluster), vec![(false, 3); 3]);
    }

    #[test]
    fn test_lowest_mode_late_joiner_learns_warps() {
        let mut cluster = cluster_of(WarpMode::McwLowest, &["alice", "bob"]);
        choose_warp(&mut cluster, 0, 3);
        choose_warp(&mut cluster, 1, 3);
        settle(&mut cluster);
        assert_eq!(warps(&cluster), vec![(false, 3); 2]);

        let carol = cluster.connect("carol");
        choose_warp(&mut cluster, carol, 5);
        settle(&mut cluster);
        let carol = &cluster.client(carol).coordinator;
        assert_eq!(carol.peers().warp_rate("alice").unwrap().rate_index, 3);
        assert_eq!(carol.peers().warp_rate("bob").unwrap().rate_index, 3);
        assert_eq!(warps(&cluster), vec![(false, 3); 3]);
    }

    #[test]
    fn test_interleaved_branches_get_distinct_ids() {
        for seed in 0..5 {
            let mut cluster = cluster_of(WarpMode::Subspace, &["alice", "bob", "carol"]);
            for i in 0..cluster.len() {
                let coordinator = &mut cluster.client_mut(i).coordinator;
                coordinator.game_mut().set_rate(3, false);
                coordinator.tick(InputEdges::NONE);
            }
            cluster.pump_interleaved(seed);
            cluster.advance(Duration::from_secs(1));
            for i in 0..cluster.len() {
                let coordinator = &mut cluster.client_mut(i).coordinator;
                coordinator.game_mut().set_rate(0, false);
                coordinator.tick(InputEdges::NONE);
            }
            cluster.pump_interleaved(seed);
            settle(&mut cluster);

            let placed: BTreeSet<SubspaceId> = (0..cluster.len())
                .filter_map(|i| cluster.client(i).coordinator.subspaces().current_subspace())
                .collect();
            let expected: BTreeSet<SubspaceId> = (1..=3).map(SubspaceId::new).collect();
            assert_eq!(placed, expected, "seed {seed}");
            assert_eq!(cluster.server().registry().len(), 4);
        }
    }

    #[test]
    fn test_world_holds_while_nobody_is_online() {
        init_tracing();
        let config = ServerConfig {
            keep_ticking_while_offline: false,
            ..ServerConfig::with_mode(WarpMode::Subspace)
        };
        let mut cluster = WarpCluster::with_store(config, MemorySubspaceStore::new());
        cluster.connect("alice");
        settle(&mut cluster);
        cluster.advance(Duration::from_secs(60));
        cluster.disconnect(0);

        cluster.advance(Duration::from_secs(3_600));
        cluster.connect("bob");
        settle(&mut cluster);
        let bob = cluster.client(0).coordinator.game().universe_time();
        assert!((bob - 160.0).abs() < 1e-6, "bob joined at {bob}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connections_never_share_ids() {
        init_tracing();
        let clock = Arc::new(ManualClock::new(CLUSTER_EPOCH));
        let control = Arc::new(WarpControl::new(
            ServerConfig::with_mode(WarpMode::Subspace),
            Arc::new(MemorySubspaceStore::new()),
            clock.clone(),
        ));

        // All joins land in subspace 0 before any branching starts
        let mut downlinks = Vec::new();
        for n in 1..=8u64 {
            let (down_tx, down_rx) = mpsc::unbounded_channel();
            control.on_client_authenticated(ConnectionId::new(n), &format!("player{n}"), down_tx);
            downlinks.push(down_rx);
        }

        let mut tasks = Vec::new();
        for n in 1..=8u64 {
            let (up_tx, up_rx) = mpsc::unbounded_channel::<Bytes>();
            tasks.push(tokio::spawn(
                control.clone().run_connection(ConnectionId::new(n), up_rx),
            ));
            tokio::spawn(async move {
                for i in 0..10 {
                    let request = WarpRequest::NewSubspace {
                        epoch_clock: ClockTicks::new(CLUSTER_EPOCH.as_ticks() + i),
                        epoch_time: 200.0 + n as f64,
                        rate: 1.0,
                    };
                    if up_tx.send(request.encode()).is_err() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            });
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(control.registry().len(), 81);
        assert_eq!(control.registry().next_id(), SubspaceId::new(81));

        let mut placed = Vec::new();
        for mut rx in downlinks {
            while let Ok(frame) = rx.try_recv() {
                if let Ok(WarpEvent::SetSubspace { subspace }) = WarpEvent::decode(&frame) {
                    if subspace != SubspaceId::ZERO {
                        placed.push(subspace);
                    }
                }
            }
        }
        let unique: BTreeSet<_> = placed.iter().copied().collect();
        assert_eq!(placed.len(), 80);
        assert_eq!(unique.len(), 80);
    }
}
