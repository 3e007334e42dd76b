// Several independently positioned readers sharing one progressive stream.

mod common;

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use ma_cache_stream::{CacheConfig, MemoryBuffer, ProgressiveCacheStream, SynchronizedReader};

use common::{pattern, runtime, ScriptedTransport};

#[test]
fn test_interleaved_handles_over_progressive_stream() {
    let rt = runtime();
    let data = pattern(10_000);
    let transport = Arc::new(ScriptedTransport::new(data.clone(), 256));
    let stream = ProgressiveCacheStream::new(
        transport,
        Box::new(MemoryBuffer::new(data.len())),
        &CacheConfig::default(),
        rt.handle().clone(),
    );

    let mut a = SynchronizedReader::new(stream);
    let mut b = a.handle();

    let mut buf = [0u8; 100];
    a.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &data[..100]);

    b.seek(SeekFrom::Start(5000)).unwrap();
    b.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &data[5000..5100]);

    a.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &data[100..200]);

    assert_eq!(b.seek(SeekFrom::End(-10)).unwrap(), 9990);
    let mut tail = Vec::new();
    b.read_to_end(&mut tail).unwrap();
    assert_eq!(&tail[..], &data[9990..]);
}

#[test]
fn test_concurrent_handles_read_whole_resource() {
    let rt = runtime();
    let data = pattern(64 * 1024);
    let transport = Arc::new(ScriptedTransport::new(data.clone(), 1024));
    let stream = ProgressiveCacheStream::new(
        transport.clone(),
        Box::new(MemoryBuffer::new(data.len())),
        &CacheConfig::default(),
        rt.handle().clone(),
    );
    let reader = SynchronizedReader::new(stream);

    let workers: Vec<_> = (0..4u64)
        .map(|i| {
            let mut handle = reader.handle();
            std::thread::spawn(move || {
                handle.seek(SeekFrom::Start(i * 1000)).unwrap();
                let mut out = Vec::new();
                handle.read_to_end(&mut out).unwrap();
                (i, out)
            })
        })
        .collect();

    for worker in workers {
        let (i, out) = worker.join().unwrap();
        assert_eq!(&out[..], &data[(i * 1000) as usize..]);
    }
    assert!(transport.max_active() <= 1);
    assert!(reader.shared().lock().is_complete());
}
