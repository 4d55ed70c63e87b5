//! Two live sessions over a loopback TCP connection.
//!
//! Both peers run on the test thread; only the sessions' reader/writer
//! helpers are concurrent, exactly as in production.

use std::net::{TcpListener, TcpStream};
use std::thread::sleep;
use std::time::Duration;

use netplay::{Game, Session, SessionError};
use nes_core::testing::input_echo_rom;
use nes_core::{load_rom, Bus, Port};

fn console() -> Bus {
    let mut bus = Bus::new(load_rom(&input_echo_rom()).unwrap());
    bus.reset();
    bus
}

/// A connected socket pair on loopback.
fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    (server, client)
}

/// Pump the client until the server's Reset arrives.
fn wait_for_reset(client: &mut Session<'_>) -> Result<(), SessionError> {
    for _ in 0..500 {
        client.handle_messages()?;
        if client.game().gen() > 0 {
            return Ok(());
        }
        sleep(Duration::from_millis(1));
    }
    panic!("reset never arrived");
}

#[test]
fn reset_hands_the_client_the_servers_checkpoint() {
    let (server_sock, client_sock) = socket_pair();

    let mut server_bus = console();
    let mut client_bus = console();

    let server_game = Game::new(&mut server_bus, Port::One);
    let client_game = Game::new(&mut client_bus, Port::Two);

    let mut server = Session::over(server_game, server_sock);
    let mut client = Session::over(client_game, client_sock);

    server.send_reset().unwrap();
    wait_for_reset(&mut client).unwrap();

    assert_eq!(client.game().frame(), 0);
    assert_eq!(
        client.game().checkpoint().state,
        server.game().checkpoint().state
    );
    assert_eq!(
        client.game().checkpoint().crc32,
        server.game().checkpoint().crc32
    );

    server.close();
    client.close();
}

#[test]
fn sixty_frames_of_play_converge_to_identical_checkpoints() {
    const FRAMES: usize = 60;

    let (server_sock, client_sock) = socket_pair();

    let mut server_bus = console();
    let mut client_bus = console();

    let mut server = Session::over(Game::new(&mut server_bus, Port::One), server_sock);
    let mut client = Session::over(Game::new(&mut client_bus, Port::Two), client_sock);

    server.send_reset().unwrap();
    wait_for_reset(&mut client).unwrap();

    for i in 0..FRAMES {
        server.send_input((i as u8).wrapping_mul(7)).unwrap();
        server.run_frame().unwrap();
        client.send_input((i as u8).wrapping_mul(13).wrapping_add(1)).unwrap();
        client.run_frame().unwrap();
    }

    // Let every input batch land on both sides.
    let all_received = |s: &Session<'_>| {
        s.game().checkpoint().frame as usize + s.game().pending_remote() >= FRAMES
    };
    for _ in 0..1000 {
        server.handle_messages().unwrap();
        client.handle_messages().unwrap();
        if all_received(&server) && all_received(&client) {
            break;
        }
        sleep(Duration::from_millis(1));
    }
    assert!(all_received(&server), "server missed input batches");
    assert!(all_received(&client), "client missed input batches");

    // One more frame reconciles everything both peers confirmed.
    server.send_input(0).unwrap();
    server.run_frame().unwrap();
    client.send_input(0).unwrap();
    client.run_frame().unwrap();

    assert_eq!(server.game().checkpoint().frame, FRAMES as u32);
    assert_eq!(client.game().checkpoint().frame, FRAMES as u32);
    assert_eq!(
        server.game().checkpoint().crc32,
        client.game().checkpoint().crc32
    );
    assert_eq!(
        server.game().checkpoint().state,
        client.game().checkpoint().state
    );

    server.send_bye();
    client.send_bye();
    server.close();
    client.close();
}

#[test]
fn bye_is_a_graceful_shutdown_signal() {
    let (server_sock, client_sock) = socket_pair();

    let mut server_bus = console();
    let mut client_bus = console();

    let mut server = Session::over(Game::new(&mut server_bus, Port::One), server_sock);
    let mut client = Session::over(Game::new(&mut client_bus, Port::Two), client_sock);

    server.send_reset().unwrap();
    wait_for_reset(&mut client).unwrap();

    server.send_bye();
    for _ in 0..500 {
        client.handle_messages().unwrap();
        if client.should_exit() {
            break;
        }
        sleep(Duration::from_millis(1));
    }
    assert!(client.should_exit());

    server.close();
    client.close();
}

#[test]
fn broken_transport_is_fatal() {
    let (server_sock, client_sock) = socket_pair();

    let mut server_bus = console();
    let mut client_bus = console();

    let server = Session::over(Game::new(&mut server_bus, Port::One), server_sock);
    let mut client = Session::over(Game::new(&mut client_bus, Port::Two), client_sock);

    // The server vanishes without a Bye.
    drop(server);

    let mut failed = false;
    for _ in 0..500 {
        if client.handle_messages().is_err() {
            failed = true;
            break;
        }
        sleep(Duration::from_millis(1));
    }
    assert!(failed, "client never noticed the dead link");

    client.close();
}
