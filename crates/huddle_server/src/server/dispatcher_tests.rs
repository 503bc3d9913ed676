#![forbid(unsafe_code)]

use huddle_domain::{ConnectionId, GroupId};
use huddle_protocol::{DEFAULT_MAX_FRAME_SIZE, PeerInfo};
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::server::dispatcher::{Dispatcher, DropReason, Outcome};
use crate::server::identity::IdentityAllocator;
use crate::server::outbound::{Frame, Outbound};

struct Client {
	peer: PeerInfo,
	rx: mpsc::Receiver<Frame>,
}

impl Client {
	fn id(&self) -> &ConnectionId {
		&self.peer.id
	}

	fn name(&self) -> &str {
		self.peer.name.as_str()
	}

	/// Everything queued so far, parsed.
	fn drain(&mut self) -> Vec<Value> {
		let mut out = Vec::new();
		while let Ok(frame) = self.rx.try_recv() {
			out.push(serde_json::from_str(&frame).expect("server frames are JSON"));
		}
		out
	}

	fn types(&mut self) -> Vec<String> {
		self.drain()
			.into_iter()
			.map(|v| v["type"].as_str().unwrap_or_default().to_string())
			.collect()
	}
}

fn dispatcher() -> Dispatcher {
	Dispatcher::new(
		IdentityAllocator::with_rng(StdRng::seed_from_u64(42), 64),
		DEFAULT_MAX_FRAME_SIZE,
	)
}

fn connect(d: &mut Dispatcher, socket: u64) -> Client {
	let (out, rx) = Outbound::channel(64);
	let peer = d.open(socket, out);
	Client { peer, rx }
}

/// Connect `n` clients and discard their handshake traffic.
fn connect_quiet(d: &mut Dispatcher, n: usize) -> Vec<Client> {
	let mut clients: Vec<Client> = (0..n).map(|i| connect(d, i as u64 + 1)).collect();
	for c in &mut clients {
		c.drain();
	}
	clients
}

fn send(d: &mut Dispatcher, from: &Client, frame: Value) -> Outcome {
	d.handle_text(from.id(), &frame.to_string())
}

fn create_group(d: &mut Dispatcher, owner: &Client) -> GroupId {
	let before: Vec<GroupId> = d.state().groups.groups_of(owner.id()).into_iter().collect();
	send(d, owner, json!({"type": "CREATE_GROUP"}));
	d.state()
		.groups
		.groups_of(owner.id())
		.into_iter()
		.find(|g| !before.contains(g))
		.expect("group created")
}

#[test]
fn open_greets_then_announces_then_rosters() {
	let mut d = dispatcher();
	let mut a = connect(&mut d, 1);

	let frames = a.drain();
	assert_eq!(frames.len(), 3);
	assert_eq!(frames[0]["type"], "SELF_CONNECTED");
	assert_eq!(frames[0]["body"]["id"], a.id().as_str());
	assert_eq!(frames[0]["body"]["name"], a.name());
	assert_eq!(frames[1]["type"], "CLIENT_CONNECTED");
	assert_eq!(frames[2]["type"], "USER_LIST");

	let mut b = connect(&mut d, 2);
	let seen_by_a = a.drain();
	assert_eq!(seen_by_a.len(), 2);
	assert_eq!(seen_by_a[0]["type"], "CLIENT_CONNECTED");
	assert_eq!(seen_by_a[0]["body"]["id"], b.id().as_str());
	assert_eq!(seen_by_a[1]["type"], "USER_LIST");
	assert_eq!(seen_by_a[1]["users"].as_array().unwrap().len(), 2);

	assert_eq!(b.types(), vec!["SELF_CONNECTED", "CLIENT_CONNECTED", "USER_LIST"]);
}

#[test]
fn display_names_are_unique_among_live_connections() {
	let mut d = dispatcher();
	let clients = connect_quiet(&mut d, 50);

	let mut names: Vec<&str> = clients.iter().map(Client::name).collect();
	names.sort();
	names.dedup();
	assert_eq!(names.len(), 50);
	assert!(names.iter().all(|n| n.starts_with("user-")));
}

#[test]
fn global_chat_reaches_everyone_but_the_publisher() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 3);

	let outcome = send(&mut d, &c[0], json!({"type": "CLIENT_MESSAGE", "body": "hello", "sender": "spoofed"}));
	assert_eq!(outcome, Outcome::Delivered(2));

	assert!(c[0].drain().is_empty());
	let sender = c[0].name().to_string();
	for other in &mut c[1..] {
		let frames = other.drain();
		assert_eq!(frames, vec![json!({"type": "CLIENT_MESSAGE", "sender": sender, "body": "hello"})]);
	}
}

#[test]
fn image_and_reply_payloads_are_forwarded_verbatim() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 2);

	send(
		&mut d,
		&c[0],
		json!({"type": "IMAGE_MESSAGE", "imageData": "data:image/png;base64,AAAA", "imageType": "image/png"}),
	);
	let reply_to = json!({"sender": "user-7", "body": "<b>raw</b>", "messageType": "CLIENT_MESSAGE"});
	send(&mut d, &c[0], json!({"type": "REPLY_MESSAGE", "body": "re", "replyTo": reply_to}));

	let frames = c[1].drain();
	assert_eq!(frames.len(), 2);
	assert_eq!(frames[0]["imageData"], "data:image/png;base64,AAAA");
	assert_eq!(frames[0]["imageType"], "image/png");
	assert_eq!(frames[1]["type"], "REPLY_MESSAGE");
	assert_eq!(frames[1]["replyTo"], reply_to);
	assert!(c[0].drain().is_empty());
}

#[test]
fn create_group_makes_owner_member_and_broadcasts_roster() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 3);

	let g = create_group(&mut d, &c[0]);
	assert!(d.state().groups.is_member(c[0].id(), &g));

	let owner = c[0].name().to_string();
	for client in &mut c {
		let frames = client.drain();
		assert_eq!(frames.len(), 1, "every connection sees the roster");
		assert_eq!(
			frames[0],
			json!({"type": "GROUP_LIST", "groups": [{"id": g.as_str(), "members": [owner]}]})
		);
	}
}

#[test]
fn group_messages_reach_members_only_and_sender_included() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 3);

	let g1 = create_group(&mut d, &c[0]);
	assert_eq!(send(&mut d, &c[1], json!({"type": "JOIN_GROUP", "groupId": g1.as_str()})), Outcome::Delivered(3));
	let mut members: Vec<ConnectionId> = d.state().groups.members(&g1).unwrap().iter().cloned().collect();
	members.sort();
	let mut expected = vec![c[0].id().clone(), c[1].id().clone()];
	expected.sort();
	assert_eq!(members, expected);
	for client in &mut c {
		client.drain();
	}

	let outcome = send(&mut d, &c[2], json!({"type": "GROUP_MESSAGE", "groupId": g1.as_str(), "body": "let me in"}));
	assert_eq!(outcome, Outcome::Dropped(DropReason::NotMember));
	for client in &mut c {
		assert!(client.drain().is_empty());
	}

	let outcome = send(&mut d, &c[1], json!({"type": "GROUP_MESSAGE", "groupId": g1.as_str(), "body": "hi"}));
	assert_eq!(outcome, Outcome::Delivered(2));

	let expected = json!({
		"type": "GROUP_MESSAGE",
		"sender": c[1].name(),
		"groupId": g1.as_str(),
		"body": "hi",
	});
	assert_eq!(c[0].drain(), vec![expected.clone()]);
	assert_eq!(c[1].drain(), vec![expected]);
	assert!(c[2].drain().is_empty());
}

#[test]
fn unknown_group_frames_are_dropped_silently() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 2);

	let ghost = "no-such-group";
	assert_eq!(
		send(&mut d, &c[0], json!({"type": "GROUP_MESSAGE", "groupId": ghost, "body": "x"})),
		Outcome::Dropped(DropReason::UnknownGroup)
	);
	assert_eq!(
		send(&mut d, &c[0], json!({"type": "JOIN_GROUP", "groupId": ghost})),
		Outcome::Dropped(DropReason::UnknownGroup)
	);
	assert_eq!(
		send(&mut d, &c[0], json!({"type": "LEAVE_GROUP", "groupId": ghost})),
		Outcome::Dropped(DropReason::UnknownGroup)
	);

	assert!(d.state().groups.is_empty());
	for client in &mut c {
		assert!(client.drain().is_empty());
	}
}

#[test]
fn leaving_keeps_the_empty_group_listed() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 2);

	let g = create_group(&mut d, &c[0]);
	c[1].drain();

	assert_eq!(send(&mut d, &c[0], json!({"type": "LEAVE_GROUP", "groupId": g.as_str()})), Outcome::Delivered(2));
	assert!(!d.state().groups.is_member(c[0].id(), &g));

	assert_eq!(
		c[1].drain(),
		vec![json!({"type": "GROUP_LIST", "groups": [{"id": g.as_str(), "members": []}]})]
	);
}

#[test]
fn private_message_is_delivered_and_echoed_identically() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 3);

	let outcome = send(
		&mut d,
		&c[0],
		json!({"type": "PRIVATE_MESSAGE", "recipientId": c[1].id().as_str(), "body": "psst"}),
	);
	assert_eq!(outcome, Outcome::Delivered(2));

	let expected = json!({
		"type": "PRIVATE_MESSAGE",
		"sender": c[0].name(),
		"senderId": c[0].id().as_str(),
		"recipientId": c[1].id().as_str(),
		"body": "psst",
	});
	assert_eq!(c[1].drain(), vec![expected.clone()]);
	assert_eq!(c[0].drain(), vec![expected]);
	assert!(c[2].drain().is_empty());
}

#[test]
fn private_reply_and_image_keep_their_payloads() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 2);
	let to = c[1].id().as_str().to_string();

	send(
		&mut d,
		&c[0],
		json!({"type": "PRIVATE_IMAGE_MESSAGE", "recipientId": to, "imageData": "AAAA", "imageType": "image/gif"}),
	);
	send(
		&mut d,
		&c[0],
		json!({"type": "PRIVATE_REPLY_MESSAGE", "recipientId": to, "body": "ok", "replyTo": {"sender": "x", "imageData": "BBBB"}}),
	);

	let frames = c[1].drain();
	assert_eq!(frames.len(), 2);
	assert_eq!(frames[0]["imageType"], "image/gif");
	assert_eq!(frames[1]["replyTo"]["imageData"], "BBBB");
	assert_eq!(c[0].drain().len(), 2);
}

#[test]
fn private_message_to_absent_peer_goes_nowhere() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 2);

	let outcome = send(
		&mut d,
		&c[0],
		json!({"type": "PRIVATE_MESSAGE", "recipientId": "gone-for-good", "body": "hello?"}),
	);
	assert_eq!(outcome, Outcome::Dropped(DropReason::RecipientGone));
	assert!(c[0].drain().is_empty());
	assert!(c[1].drain().is_empty());
}

#[test]
fn self_addressed_private_message_arrives_twice() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 2);
	let me = c[0].id().as_str().to_string();

	let outcome = send(&mut d, &c[0], json!({"type": "PRIVATE_MESSAGE", "recipientId": me, "body": "note to self"}));
	assert_eq!(outcome, Outcome::Delivered(2));

	let expected = json!({
		"type": "PRIVATE_MESSAGE",
		"sender": c[0].name(),
		"senderId": me,
		"recipientId": me,
		"body": "note to self",
	});
	assert_eq!(c[0].drain(), vec![expected.clone(), expected]);
	assert!(c[1].drain().is_empty());
}

#[test]
fn payloads_of_any_json_shape_pass_through_untouched() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 2);

	assert_eq!(send(&mut d, &c[0], json!({"type": "CLIENT_MESSAGE", "body": 42})), Outcome::Delivered(1));
	let rich = json!({"text": "hi", "ts": 1});
	assert_eq!(send(&mut d, &c[0], json!({"type": "CLIENT_MESSAGE", "body": rich})), Outcome::Delivered(1));

	let quoted = json!({"sender": "x", "body": "y", "timestamp": 123, "reactions": ["+1"]});
	let to = c[1].id().as_str().to_string();
	assert_eq!(
		send(&mut d, &c[0], json!({"type": "PRIVATE_REPLY_MESSAGE", "recipientId": to, "body": "ok", "replyTo": quoted})),
		Outcome::Delivered(2)
	);

	let frames = c[1].drain();
	assert_eq!(frames.len(), 3);
	assert_eq!(frames[0]["body"], 42);
	assert_eq!(frames[1]["body"], rich);
	assert_eq!(frames[2]["replyTo"], quoted);
}

#[test]
fn group_image_and_reply_follow_the_membership_gate() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 3);

	let g = create_group(&mut d, &c[0]);
	send(&mut d, &c[1], json!({"type": "JOIN_GROUP", "groupId": g.as_str()}));
	for client in &mut c {
		client.drain();
	}

	let image = json!({"type": "GROUP_IMAGE_MESSAGE", "groupId": g.as_str(), "imageData": "AAAA", "imageType": "image/webp"});
	let quoted = json!({"sender": "user-5", "imageData": "CCCC", "messageType": "GROUP_IMAGE_MESSAGE"});
	let reply = json!({"type": "GROUP_REPLY_MESSAGE", "groupId": g.as_str(), "body": "nice", "replyTo": quoted});

	assert_eq!(send(&mut d, &c[2], image.clone()), Outcome::Dropped(DropReason::NotMember));
	assert_eq!(send(&mut d, &c[2], reply.clone()), Outcome::Dropped(DropReason::NotMember));
	for client in &mut c {
		assert!(client.drain().is_empty());
	}

	assert_eq!(send(&mut d, &c[1], image), Outcome::Delivered(2));
	assert_eq!(send(&mut d, &c[1], reply), Outcome::Delivered(2));

	let expected = vec![
		json!({
			"type": "GROUP_IMAGE_MESSAGE",
			"sender": c[1].name(),
			"groupId": g.as_str(),
			"imageData": "AAAA",
			"imageType": "image/webp",
		}),
		json!({
			"type": "GROUP_REPLY_MESSAGE",
			"sender": c[1].name(),
			"groupId": g.as_str(),
			"body": "nice",
			"replyTo": quoted,
		}),
	];
	assert_eq!(c[0].drain(), expected);
	assert_eq!(c[1].drain(), expected);
	assert!(c[2].drain().is_empty());
}

#[test]
fn typing_follows_the_base_kind_addressing() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 3);

	assert_eq!(send(&mut d, &c[0], json!({"type": "TYPING_STARTED"})), Outcome::Delivered(2));
	assert!(c[0].drain().is_empty());
	assert_eq!(c[1].types(), vec!["TYPING_STARTED"]);
	assert_eq!(c[2].types(), vec!["TYPING_STARTED"]);

	let g = create_group(&mut d, &c[0]);
	for client in &mut c {
		client.drain();
	}
	assert_eq!(
		send(&mut d, &c[1], json!({"type": "GROUP_TYPING_STARTED", "groupId": g.as_str()})),
		Outcome::Dropped(DropReason::NotMember)
	);
	assert_eq!(
		send(&mut d, &c[0], json!({"type": "GROUP_TYPING_STOPPED", "groupId": g.as_str()})),
		Outcome::Delivered(1)
	);
	assert_eq!(c[0].types(), vec!["GROUP_TYPING_STOPPED"]);
	assert!(c[1].drain().is_empty());

	let to = c[2].id().as_str().to_string();
	assert_eq!(
		send(&mut d, &c[1], json!({"type": "PRIVATE_TYPING_STARTED", "recipientId": to})),
		Outcome::Delivered(1)
	);
	let frames = c[2].drain();
	assert_eq!(frames.len(), 1);
	assert_eq!(frames[0]["senderId"], c[1].id().as_str());
	assert!(c[1].drain().is_empty());
}

#[test]
fn roster_queries_are_answered_to_the_requester_only() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 3);

	assert_eq!(send(&mut d, &c[0], json!({"type": "USER_LIST"})), Outcome::Delivered(1));
	let frames = c[0].drain();
	assert_eq!(frames.len(), 1);
	assert_eq!(frames[0]["users"].as_array().unwrap().len(), 3);

	assert_eq!(send(&mut d, &c[0], json!({"type": "GROUP_LIST"})), Outcome::Delivered(1));
	assert_eq!(c[0].drain(), vec![json!({"type": "GROUP_LIST", "groups": []})]);

	assert!(c[1].drain().is_empty());
	assert!(c[2].drain().is_empty());
}

#[test]
fn bad_frames_are_dropped_and_the_connection_stays_usable() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 2);
	let from = c[0].id().clone();

	let cases = [
		("{not json", "unparseable"),
		("{\"body\": \"x\"}", "missing_type"),
		("{\"type\": \"SHOUT\"}", "unknown_type"),
		("{\"type\": \"SELF_CONNECTED\"}", "server_only"),
		("{\"type\": \"GROUP_MESSAGE\", \"body\": \"x\"}", "malformed"),
		("{\"type\": \"PRIVATE_MESSAGE\", \"body\": \"x\"}", "malformed"),
		("{\"type\": \"REPLY_MESSAGE\", \"body\": \"x\"}", "malformed"),
	];
	for (text, reason) in cases {
		assert_eq!(d.handle_text(&from, text), Outcome::Dropped(DropReason::Decode(reason)), "{text}");
	}

	assert!(d.state().registry.is_live(&from));
	assert!(c[1].drain().is_empty());
	assert_eq!(send(&mut d, &c[0], json!({"type": "CLIENT_MESSAGE", "body": "still here"})), Outcome::Delivered(1));
}

#[test]
fn frames_from_unregistered_connections_are_ignored() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 1);

	let stranger = ConnectionId::new("stranger").unwrap();
	let outcome = d.handle_text(&stranger, &json!({"type": "CLIENT_MESSAGE", "body": "boo"}).to_string());
	assert_eq!(outcome, Outcome::Dropped(DropReason::UnknownSender));
	assert!(c[0].drain().is_empty());
}

#[test]
fn close_tears_down_membership_and_announces_departure() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 3);

	let g1 = create_group(&mut d, &c[0]);
	send(&mut d, &c[1], json!({"type": "JOIN_GROUP", "groupId": g1.as_str()}));
	let g2 = create_group(&mut d, &c[0]);
	for client in &mut c {
		client.drain();
	}

	let a = c.remove(0);
	let departed = d.close(a.id()).expect("was live");
	assert_eq!(departed.id, *a.id());

	assert!(d.state().registry.lookup(a.id()).is_none());
	assert!(!d.state().groups.is_member(a.id(), &g1));
	assert!(!d.state().groups.is_member(a.id(), &g2));
	assert!(d.state().groups.groups_of(a.id()).is_empty());

	for client in &mut c {
		let frames = client.drain();
		assert_eq!(frames, vec![json!({"type": "CLIENT_DISCONNECTED", "body": {"id": a.id().as_str(), "name": a.name()}})]);
	}

	// Roster requested afterwards shows only the remaining member.
	send(&mut d, &c[0], json!({"type": "GROUP_LIST"}));
	let frames = c[0].drain();
	let groups = frames[0]["groups"].as_array().unwrap();
	let listed_g1 = groups.iter().find(|g| g["id"] == g1.as_str()).unwrap();
	assert_eq!(listed_g1["members"], json!([c[0].name()]));
	let listed_g2 = groups.iter().find(|g| g["id"] == g2.as_str()).unwrap();
	assert_eq!(listed_g2["members"], json!([]));

	// Second close is a no-op.
	assert!(d.close(a.id()).is_none());
	for client in &mut c {
		assert!(client.drain().is_empty());
	}
}

#[test]
fn addressing_a_closed_connection_resolves_to_not_found() {
	let mut d = dispatcher();
	let mut c = connect_quiet(&mut d, 2);
	let gone = c[1].id().as_str().to_string();

	d.close(c[1].id());
	c[0].drain();

	let outcome = send(&mut d, &c[0], json!({"type": "PRIVATE_MESSAGE", "recipientId": gone, "body": "late"}));
	assert_eq!(outcome, Outcome::Dropped(DropReason::RecipientGone));
	assert!(c[0].drain().is_empty());
}

#[test]
fn slow_peer_does_not_block_others() {
	let mut d = dispatcher();
	let (slow_out, _slow_rx) = Outbound::channel(1);
	let slow = d.open(99, slow_out);
	let mut c = connect_quiet(&mut d, 2);

	// The slow peer's queue is already full from its own handshake.
	let outcome = send(&mut d, &c[0], json!({"type": "CLIENT_MESSAGE", "body": "x"}));
	assert_eq!(outcome, Outcome::Delivered(1));
	assert_eq!(c[1].types(), vec!["CLIENT_MESSAGE"]);
	assert!(d.state().registry.is_live(&slow.id));
}

#[derive(Debug, Clone)]
enum Op {
	Create(usize),
	Join(usize, usize),
	Leave(usize, usize),
	Close(usize),
	Reopen(usize),
}

fn op() -> impl Strategy<Value = Op> {
	prop_oneof![
		(0usize..4).prop_map(Op::Create),
		(0usize..4, 0usize..6).prop_map(|(c, g)| Op::Join(c, g)),
		(0usize..4, 0usize..6).prop_map(|(c, g)| Op::Leave(c, g)),
		(0usize..4).prop_map(Op::Close),
		(0usize..4).prop_map(Op::Reopen),
	]
}

proptest! {
	#[test]
	fn membership_index_stays_in_lockstep(ops in proptest::collection::vec(op(), 1..60)) {
		let mut d = dispatcher();
		let mut slots: Vec<Option<Client>> = (0..4).map(|i| Some(connect(&mut d, i as u64))).collect();
		let mut groups: Vec<GroupId> = Vec::new();
		let mut closed: Vec<ConnectionId> = Vec::new();

		for op in ops {
			match op {
				Op::Create(i) => {
					if let Some(c) = &slots[i] {
						groups.push(create_group(&mut d, c));
					}
				}
				Op::Join(i, g) | Op::Leave(i, g) if groups.is_empty() || slots[i].is_none() => {
					let _ = g;
				}
				Op::Join(i, g) => {
					let c = slots[i].as_ref().unwrap();
					let gid = groups[g % groups.len()].clone();
					send(&mut d, c, json!({"type": "JOIN_GROUP", "groupId": gid.as_str()}));
				}
				Op::Leave(i, g) => {
					let c = slots[i].as_ref().unwrap();
					let gid = groups[g % groups.len()].clone();
					send(&mut d, c, json!({"type": "LEAVE_GROUP", "groupId": gid.as_str()}));
				}
				Op::Close(i) => {
					if let Some(c) = slots[i].take() {
						d.close(c.id());
						closed.push(c.id().clone());
					}
				}
				Op::Reopen(i) => {
					if slots[i].is_none() {
						slots[i] = Some(connect(&mut d, 100 + i as u64));
					}
				}
			}

			for c in slots.iter_mut().flatten() {
				c.drain();
			}

			for c in slots.iter().flatten() {
				let indexed = d.state().groups.groups_of(c.id());
				for g in &groups {
					prop_assert_eq!(indexed.contains(g), d.state().groups.is_member(c.id(), g));
				}
			}
			for gone in &closed {
				prop_assert!(d.state().registry.lookup(gone).is_none());
				prop_assert!(d.state().groups.groups_of(gone).is_empty());
				for g in &groups {
					prop_assert!(!d.state().groups.is_member(gone, g));
				}
			}
		}
	}
}
