use fitalloc::{Heap, HeapConfig, SegregatedLists, SystemPages, system_page_size};

fn log_alloc(addr: std::ptr::NonNull<u8>, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let config = HeapConfig::new().with_page_size(system_page_size());
    let mut heap: Heap<SegregatedLists, _> =
        Heap::with_config(SystemPages::new(), config).expect("system page size is usable");

    heap.initialize();

    unsafe {
        let addr1 = heap.allocate(8);
        log_alloc(addr1, 8);

        let addr2 = heap.allocate(512);
        log_alloc(addr2, 512);

        let addr3 = heap.allocate(2048);
        log_alloc(addr3, 2048);

        heap.free(addr1);
        heap.free(addr2);
        heap.free(addr3);
    }

    let stats = heap.finalize();
    println!(
        "{} pages acquired, {} free blocks holding {} bytes",
        stats.pages_acquired, stats.free_blocks, stats.free_bytes
    );
}
