use anyhow::Result;
use irongraph::wire::{NEXT_PHASE_FLAG, WorkerRequest, split_wire_partition_id, wire_partition_id};
use irongraph::EngineError;

fn round_trip(req: &WorkerRequest) -> Result<()> {
    let bytes = req.encode();
    let back = WorkerRequest::decode(&bytes)?;
    assert_eq!(&back, req);
    Ok(())
}

#[test]
fn worker_messages_round_trip_preserves_order() -> Result<()> {
    let req = WorkerRequest::SendWorkerMessages {
        batches: vec![
            (
                3,
                vec![
                    (vec![1, 2], vec![9, 9, 9]),
                    (vec![1, 2], vec![8]),
                    (vec![5], vec![]),
                ],
            ),
            (7 | NEXT_PHASE_FLAG, vec![(vec![0], vec![1, 2, 3, 4])]),
        ],
    };
    let bytes = req.encode();
    let WorkerRequest::SendWorkerMessages { batches } = WorkerRequest::decode(&bytes)? else {
        panic!("wrong variant");
    };
    // Per-destination iteration order must match the original.
    assert_eq!(batches[0].0, 3);
    assert_eq!(
        batches[0].1,
        vec![
            (vec![1, 2], vec![9, 9, 9]),
            (vec![1, 2], vec![8]),
            (vec![5], vec![]),
        ]
    );
    assert_eq!(batches[1].0, 7 | NEXT_PHASE_FLAG);
    Ok(())
}

#[test]
fn control_requests_round_trip() -> Result<()> {
    round_trip(&WorkerRequest::SendToken { from: 10, to: 20 })?;
    round_trip(&WorkerRequest::SendFork {
        from: u64::MAX,
        to: 0,
    })?;
    round_trip(&WorkerRequest::SendGlobalToken { from: 0, to: 1 })?;
    round_trip(&WorkerRequest::SendPartitionToken { from: 5, to: 6 })?;
    round_trip(&WorkerRequest::SendWorkerMessages { batches: vec![] })?;
    Ok(())
}

#[test]
fn phase_flag_occupies_the_high_bit() -> Result<()> {
    assert_eq!(wire_partition_id(5, false)?, 5);
    assert_eq!(wire_partition_id(5, true)?, 5 | NEXT_PHASE_FLAG);
    assert_eq!(split_wire_partition_id(5 | NEXT_PHASE_FLAG), (5, true));
    assert_eq!(split_wire_partition_id(5), (5, false));

    // Partition ids only get 31 bits.
    let err = wire_partition_id(NEXT_PHASE_FLAG, false).unwrap_err();
    assert!(matches!(err, EngineError::WireFormat(_)));
    Ok(())
}

#[test]
fn malformed_payloads_are_rejected() {
    assert!(matches!(
        WorkerRequest::decode(&[]),
        Err(EngineError::WireFormat(_))
    ));
    assert!(matches!(
        WorkerRequest::decode(&[42]),
        Err(EngineError::WireFormat(_))
    ));
    // Truncated token payload.
    assert!(matches!(
        WorkerRequest::decode(&[2, 0, 0]),
        Err(EngineError::WireFormat(_))
    ));
    // Length prefix larger than the remaining bytes.
    let mut bytes = vec![1u8];
    bytes.extend_from_slice(&1u32.to_be_bytes()); // one batch
    bytes.extend_from_slice(&0u32.to_be_bytes()); // partition 0
    bytes.extend_from_slice(&1u32.to_be_bytes()); // one pair
    bytes.extend_from_slice(&1000u32.to_be_bytes()); // bogus dest length
    assert!(matches!(
        WorkerRequest::decode(&bytes),
        Err(EngineError::WireFormat(_))
    ));
    // Trailing garbage after a valid token.
    let mut ok = WorkerRequest::SendToken { from: 1, to: 2 }.encode();
    ok.push(0);
    assert!(matches!(
        WorkerRequest::decode(&ok),
        Err(EngineError::WireFormat(_))
    ));
}
